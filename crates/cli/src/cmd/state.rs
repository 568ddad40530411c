//! Implementation of the `stagecraft state` command.
//!
//! Reads the stage's state document without the password: secret values
//! are shown redacted.

use std::path::Path;

use anyhow::{Context, Result};

use stagecraft_lib::deploy::load_state_view;
use stagecraft_lib::settings::{RunInputs, Settings};

use crate::output::{OutputFormat, format_timestamp, print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_state(config: &Path, verbose: bool, output: OutputFormat) -> Result<()> {
  let settings = Settings::load(config).context("Failed to load settings")?;
  let inputs = RunInputs::from_env().context("Invalid run inputs")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let view = rt
    .block_on(load_state_view(&settings, &inputs))
    .context("Failed to load state")?;

  if output.is_json() {
    return print_json(&view);
  }

  let Some(view) = view else {
    print_info(&format!(
      "No state recorded for {}/{}. Run 'stagecraft deploy' to create it.",
      settings.app.name, inputs.stage
    ));
    return Ok(());
  };

  print_success(&format!("State for {}", view.scope));
  print_stat("Store", &view.store);
  print_stat("Updated", &format_timestamp(view.updated_at));
  print_stat("Resources", &view.resources.len().to_string());

  for resource in &view.resources {
    println!(
      "  {} {} ({}, {})",
      symbols::INFO,
      resource.name,
      resource.kind,
      resource.status
    );
    if !resource.depends_on.is_empty() {
      println!("      depends on: {}", resource.depends_on.join(", "));
    }
    if verbose {
      for (key, value) in &resource.outputs {
        println!("      {} = {}", key, value);
      }
    }
  }

  Ok(())
}
