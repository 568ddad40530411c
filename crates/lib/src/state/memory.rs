//! In-process state store.
//!
//! Clones share the same document, so a caller can keep a handle and inspect
//! what a scope persisted.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::StateStore;
use super::types::{LockMode, StateDocument, StateError};

#[derive(Debug, Default)]
struct MemoryInner {
  document: Option<StateDocument>,
  exclusive: bool,
  saves: usize,
  fail_saves: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
  inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// The last saved document.
  pub fn document(&self) -> Option<StateDocument> {
    self.guard().document.clone()
  }

  /// Number of successful saves.
  pub fn save_count(&self) -> usize {
    self.guard().saves
  }

  /// Make every later save fail, as a broken backend would.
  pub fn fail_saves(&self, fail: bool) {
    self.guard().fail_saves = fail;
  }

  pub fn is_locked(&self) -> bool {
    self.guard().exclusive
  }

  fn guard(&self) -> MutexGuard<'_, MemoryInner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  fn describe(&self) -> String {
    "memory".to_string()
  }

  async fn lock(&self, mode: LockMode) -> Result<(), StateError> {
    let mut inner = self.guard();
    if inner.exclusive {
      return Err(StateError::Locked("in-memory scope".to_string()));
    }
    inner.exclusive = mode == LockMode::Exclusive;
    Ok(())
  }

  async fn unlock(&self) -> Result<(), StateError> {
    self.guard().exclusive = false;
    Ok(())
  }

  async fn load(&self) -> Result<Option<StateDocument>, StateError> {
    Ok(self.guard().document.clone())
  }

  async fn save(&self, document: &StateDocument) -> Result<(), StateError> {
    let mut inner = self.guard();
    if inner.fail_saves {
      return Err(StateError::Write(std::io::Error::other("in-memory store rejects writes")));
    }
    inner.document = Some(document.clone());
    inner.saves += 1;
    Ok(())
  }
}
