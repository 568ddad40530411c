//! Local filesystem state store.
//!
//! # Storage Layout
//!
//! ```text
//! {root}/{app}/{stage}/
//! ├── .lock         # ScopeLock metadata
//! └── state.json    # StateDocument
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::StateStore;
use super::lock::ScopeLock;
use super::types::{LockMode, StateDocument, StateError};
use crate::consts::{STATE_FILENAME, STATE_VERSION};

#[derive(Debug)]
pub struct LocalStateStore {
  dir: PathBuf,
  scope: String,
  lock: Mutex<Option<ScopeLock>>,
}

impl LocalStateStore {
  /// Create a store rooted at the scope's own directory.
  pub fn new(dir: PathBuf, scope: impl Into<String>) -> Self {
    Self {
      dir,
      scope: scope.into(),
      lock: Mutex::new(None),
    }
  }

  pub fn dir(&self) -> &PathBuf {
    &self.dir
  }

  fn state_path(&self) -> PathBuf {
    self.dir.join(STATE_FILENAME)
  }

  fn held_lock(&self) -> std::sync::MutexGuard<'_, Option<ScopeLock>> {
    self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl StateStore for LocalStateStore {
  fn describe(&self) -> String {
    format!("local:{}", self.dir.display())
  }

  async fn lock(&self, mode: LockMode) -> Result<(), StateError> {
    let acquired = ScopeLock::acquire(&self.dir, mode, &self.scope)?;
    *self.held_lock() = Some(acquired);
    Ok(())
  }

  async fn unlock(&self) -> Result<(), StateError> {
    self.held_lock().take();
    Ok(())
  }

  async fn load(&self) -> Result<Option<StateDocument>, StateError> {
    let content = match fs::read_to_string(self.state_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StateError::Read(e)),
    };

    let document: StateDocument = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if document.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(document.version));
    }

    Ok(Some(document))
  }

  /// Write via a temp file and rename so a crash never leaves a torn document.
  async fn save(&self, document: &StateDocument) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).map_err(StateError::CreateDir)?;

    let path = self.state_path();
    let temp_path = self.dir.join(format!("{}.tmp", STATE_FILENAME));

    let content = serde_json::to_string_pretty(document).map_err(StateError::Serialize)?;
    fs::write(&temp_path, &content).map_err(StateError::Write)?;
    fs::rename(&temp_path, &path).map_err(StateError::Write)?;

    debug!(path = %path.display(), resources = document.resources.len(), "state saved");
    Ok(())
  }
}
