//! Implementation of the `stagecraft destroy` command.
//!
//! Opens the stage's scope, declares nothing and finalizes it, which deletes
//! every recorded resource dependents-first.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use stagecraft_lib::deploy::{providers_from_env, run_destroy};
use stagecraft_lib::settings::{RunInputs, Settings};

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, symbols};
use crate::prompts::confirm;

pub fn cmd_destroy(config: &Path, force: bool, output: OutputFormat) -> Result<()> {
  let settings = Settings::load(config).context("Failed to load settings")?;
  let inputs = RunInputs::from_env().context("Invalid run inputs")?;

  let question = format!(
    "Delete every resource of {} in stage {}?",
    settings.app.name, inputs.stage
  );
  if !confirm(&question, force)? {
    print_info("Aborted.");
    return Ok(());
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(run_destroy(&settings, &inputs, providers_from_env(), None))
    .context("Destroy failed")?;

  if output.is_json() {
    print_json(&json!({ "deleted": report.deleted }))?;
  } else if report.deleted.is_empty() {
    print_info("Nothing to destroy.");
  } else {
    print_success("Destroy complete!");
    print_stat("Deleted", &report.deleted.len().to_string());
    for name in &report.deleted {
      println!("  {} {}", symbols::REMOVE, name);
    }
  }

  Ok(())
}
