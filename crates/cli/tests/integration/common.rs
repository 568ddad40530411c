//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Settings for a single worker with one plain and one secret binding.
pub const SETTINGS: &str = r#"
[app]
name = "react-router-app"

[worker]
main = "build/index.js"

[worker.bindings]
PUBLIC_VALUE = "shown"
SECRET = { secret = "hidden-value" }
"#;

/// Every environment input the binary reads.
const INPUT_VARS: &[&str] = &[
  "STAGE",
  "STAGECRAFT_PASSWORD",
  "STAGECRAFT_STATE_TOKEN",
  "STAGECRAFT_STATE_URL",
  "STAGECRAFT_STATE_DIR",
  "PULL_REQUEST",
  "GITHUB_SHA",
  "GITHUB_TOKEN",
  "CLOUDFLARE_API_TOKEN",
  "CLOUDFLARE_ACCOUNT_ID",
];

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the settings file, the
/// built worker module and the local state root.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_settings(SETTINGS)
  }

  pub fn with_settings(content: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("stagecraft.toml");
    std::fs::write(&config_path, content).unwrap();
    let env = Self { temp, config_path };
    env.write_file("build/index.js", "export default { fetch() { return new Response('ok') } }");
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Local state root (isolated per test).
  pub fn state_path(&self) -> PathBuf {
    let p = self.temp.path().join("state");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Get a pre-configured Command for the stagecraft binary.
  ///
  /// Clears every input the binary reads from the environment, then sets:
  /// - `STAGECRAFT_STATE_DIR`: isolated local state root
  /// - `STAGECRAFT_PASSWORD`: a fixed test password
  /// - `RUST_LOG`: quiet logging so assertions only see command output
  pub fn stagecraft_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("stagecraft");
    for var in INPUT_VARS {
      cmd.env_remove(var);
    }
    cmd.env("STAGECRAFT_STATE_DIR", self.state_path());
    cmd.env("STAGECRAFT_PASSWORD", "integration-password");
    cmd.env("RUST_LOG", "warn");
    cmd.arg("--config").arg(&self.config_path);
    cmd
  }
}
