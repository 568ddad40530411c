use std::collections::BTreeMap;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_VERSION;
use crate::value::StoredValue;

/// The persisted record of the last reconciled resource set for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
  pub version: u32,
  pub app: String,
  pub stage: String,
  /// Unix seconds of the last write.
  pub updated_at: u64,
  pub resources: BTreeMap<String, ResourceState>,
}

impl StateDocument {
  pub fn new(app: &str, stage: &str) -> Self {
    Self {
      version: STATE_VERSION,
      app: app.to_string(),
      stage: stage.to_string(),
      updated_at: 0,
      resources: BTreeMap::new(),
    }
  }

  /// Stamp the document with the current time.
  pub fn touch(&mut self) {
    self.updated_at = unix_now();
  }
}

/// Persisted state of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
  /// Provider kind, e.g. `cloudflare::Worker`.
  pub kind: String,
  pub status: ResourceStatus,
  /// Declaration order within the run that last touched this resource.
  pub seq: u64,
  /// Logical names of resources whose outputs this resource's config reads.
  #[serde(default)]
  pub depends_on: Vec<String>,
  /// Resolved config (references already substituted).
  pub config: BTreeMap<String, StoredValue>,
  pub outputs: BTreeMap<String, StoredValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
  Created,
  Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state version: {0}")]
  UnsupportedVersion(u32),

  #[error("state belongs to {found}, expected {expected}")]
  ScopeMismatch { expected: String, found: String },

  #[error("scope is locked by another run: {0}")]
  Locked(String),

  #[error("failed to acquire state lock: {0}")]
  Lock(#[source] io::Error),

  #[error("state request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("state service returned {status}: {body}")]
  Status { status: u16, body: String },
}

pub(crate) fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
