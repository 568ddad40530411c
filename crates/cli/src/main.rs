mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// stagecraft - stage-aware declarative deployment for an edge worker
#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the settings file
  #[arg(short, long, global = true, default_value = "stagecraft.toml")]
  config: PathBuf,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build, deploy the worker and reconcile the stage's resources
  Deploy {
    /// Skip the configured build command
    #[arg(long)]
    skip_build: bool,
  },

  /// Delete every resource recorded for the stage
  Destroy {
    /// Do not ask for confirmation
    #[arg(short, long)]
    force: bool,
  },

  /// Show the recorded state of the stage
  State,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("stagecraft_lib={level},stagecraft_cli={level}")));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Deploy { skip_build } => cmd::cmd_deploy(&cli.config, skip_build, cli.output),
    Commands::Destroy { force } => cmd::cmd_destroy(&cli.config, force, cli.output),
    Commands::State => cmd::cmd_state(&cli.config, cli.verbose, cli.output),
  }
}
