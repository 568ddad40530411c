mod common;
mod deploy_tests;
mod destroy_tests;
mod state_tests;
