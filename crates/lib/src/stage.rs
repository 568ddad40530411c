//! Deployment stage resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_STAGE, STAGE_ENV};

/// A named deployment environment such as `dev` or `prod`.
///
/// Exactly one stage is active per run. It never changes after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(String);

impl Stage {
  /// Resolve a stage from an optional override, falling back to `dev`.
  ///
  /// Empty and whitespace-only overrides count as absent.
  pub fn resolve(value: Option<String>) -> Self {
    match value {
      Some(v) if !v.trim().is_empty() => Stage(v.trim().to_string()),
      _ => Stage(DEFAULT_STAGE.to_string()),
    }
  }

  /// Resolve the stage from the `STAGE` environment variable.
  pub fn from_env() -> Self {
    Self::resolve(std::env::var(STAGE_ENV).ok())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Whether this is the local development stage.
  pub fn is_dev(&self) -> bool {
    self.0 == DEFAULT_STAGE
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
