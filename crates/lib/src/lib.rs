//! stagecraft-lib: declarative, stage-aware deployment of an edge worker
//!
//! The crate is organised around a [`scope::Scope`]: one run of one
//! application in one stage. Resources are declared against the scope in
//! dependency order, reconciled through [`provider::Provider`]s and recorded
//! in a [`state::StateStore`]; finalizing the scope prunes whatever the
//! previous run declared and this one did not.
//!
//! - `stage` and `state` pick the environment and where its state lives
//! - `secret` and `value` model configuration, with secrets sealed at rest
//! - `provider` holds the Cloudflare worker and GitHub comment providers
//! - `deploy` is the deployment program itself
//! - `runtime` is the deployed worker's request entry point

pub mod consts;
pub mod deploy;
pub mod projection;
pub mod provider;
pub mod runtime;
pub mod scope;
pub mod secret;
pub mod settings;
pub mod stage;
pub mod state;
pub mod util;
pub mod value;
