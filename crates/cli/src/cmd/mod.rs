mod deploy;
mod destroy;
mod state;

pub use deploy::cmd_deploy;
pub use destroy::cmd_destroy;
pub use state::cmd_state;
