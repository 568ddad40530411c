//! Implementation of the `stagecraft deploy` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use stagecraft_lib::deploy::{CommentOutcome, DeployOptions, providers_from_env, run_deploy};
use stagecraft_lib::settings::{RunInputs, Settings};

use crate::output::{OutputFormat, format_duration, print_info, print_json, print_stat, print_success, print_warning};

/// Execute the deploy command.
///
/// Loads the settings file and the run inputs from the environment, runs the
/// deployment program and prints `{url, name}` followed by what changed. A
/// preview comment that could not be posted is reported as a warning only.
pub fn cmd_deploy(config: &Path, skip_build: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  debug!(config = %config.display(), "loading settings");
  let settings = Settings::load(config).context("Failed to load settings")?;
  let inputs = RunInputs::from_env().context("Invalid run inputs")?;
  let stage = inputs.stage.clone();

  let options = DeployOptions {
    settings,
    inputs,
    providers: providers_from_env(),
    work_factor: None,
    build: !skip_build,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(run_deploy(options)).context("Deploy failed")?;

  if output.is_json() {
    let comment = match &outcome.comment {
      CommentOutcome::NotRequested => json!(null),
      CommentOutcome::Skipped(reason) => json!({ "skipped": reason }),
      CommentOutcome::Posted { url } => json!({ "url": url }),
      CommentOutcome::Failed(error) => json!({ "error": error }),
    };
    print_json(&json!({
      "url": outcome.summary.url,
      "name": outcome.summary.name,
      "stage": stage.as_str(),
      "script_name": outcome.script_name,
      "created": outcome.report.created,
      "updated": outcome.report.updated,
      "unchanged": outcome.report.unchanged,
      "deleted": outcome.report.deleted,
      "comment": comment,
    }))?;
    return Ok(());
  }

  print_json(&outcome.summary)?;
  println!();
  print_success(&format!("Deployed {} to stage {}", outcome.summary.name, stage));
  if let Some(script) = &outcome.script_name {
    print_stat("Script", script);
  }
  print_stat("Created", &outcome.report.created.len().to_string());
  print_stat("Updated", &outcome.report.updated.len().to_string());
  print_stat("Unchanged", &outcome.report.unchanged.len().to_string());
  print_stat("Deleted", &outcome.report.deleted.len().to_string());
  if !outcome.env.is_empty() {
    print_stat("Env", &outcome.env.keys().collect::<Vec<_>>().join(", "));
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  match &outcome.comment {
    CommentOutcome::NotRequested => {}
    CommentOutcome::Posted { url } => print_info(&format!(
      "Preview comment: {}",
      url.as_deref().unwrap_or("posted")
    )),
    CommentOutcome::Skipped(reason) => print_warning(&format!("Preview comment skipped: {}", reason)),
    CommentOutcome::Failed(error) => print_warning(&format!("Preview comment failed: {}", error)),
  }

  Ok(())
}
