//! State persistence for scopes.
//!
//! A [`StateStore`] reads and writes the [`StateDocument`] of one scope and
//! owns the lock that keeps two runs of the same scope apart. Which store a
//! run uses is a pure function of its stage, see [`select_state_store`].

mod local;
mod lock;
mod memory;
mod remote;
mod types;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

pub use local::LocalStateStore;
pub use lock::{LockMetadata, ScopeLock};
pub use memory::MemoryStateStore;
pub use remote::RemoteStateStore;
pub use types::{LockMode, ResourceState, ResourceStatus, StateDocument, StateError};

use crate::scope::ScopeId;
use crate::secret::Secret;
use crate::settings::ConfigError;
use crate::stage::Stage;

#[async_trait]
pub trait StateStore: Send + Sync + fmt::Debug {
  /// Short human-readable location, for logs.
  fn describe(&self) -> String;

  /// Take the scope lock. Fails with [`StateError::Locked`] on contention.
  async fn lock(&self, mode: LockMode) -> Result<(), StateError>;

  async fn unlock(&self) -> Result<(), StateError>;

  /// Load the last persisted document, `None` if the scope has never been saved.
  async fn load(&self) -> Result<Option<StateDocument>, StateError>;

  async fn save(&self, document: &StateDocument) -> Result<(), StateError>;
}

/// Builds the state store once the scope identity is known.
pub type StateStoreFactory = Box<dyn FnOnce(&ScopeId) -> Result<Arc<dyn StateStore>, ConfigError> + Send>;

/// Backend inputs shared by every stage.
#[derive(Debug, Clone, Default)]
pub struct StoreSettings {
  pub local_root: PathBuf,
  pub remote_url: Option<String>,
  pub script_prefix: Option<String>,
  pub token: Option<Secret>,
}

/// The backend chosen for a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreSelection {
  Local {
    root: PathBuf,
  },
  Remote {
    endpoint: Option<String>,
    script_name: String,
    token: Option<Secret>,
  },
}

/// Choose the state backend for `stage`.
///
/// The development stage keeps state on this machine and needs no
/// credentials. Every other stage shares state remotely under a name that
/// embeds the stage, so stages never see each other's documents.
pub fn select_state_store(stage: &Stage, app: &str, settings: &StoreSettings) -> StoreSelection {
  if stage.is_dev() {
    return StoreSelection::Local {
      root: settings.local_root.clone(),
    };
  }

  let prefix = settings
    .script_prefix
    .clone()
    .unwrap_or_else(|| format!("{}-state", app));

  StoreSelection::Remote {
    endpoint: settings.remote_url.clone(),
    script_name: format!("{}-{}", prefix, stage),
    token: settings.token.clone(),
  }
}

impl StoreSelection {
  pub fn is_local(&self) -> bool {
    matches!(self, StoreSelection::Local { .. })
  }

  /// Turn the selection into the factory a scope is opened with.
  ///
  /// Missing remote credentials are reported when the factory runs, which
  /// happens inside `Scope::open` before any lock or declaration.
  pub fn into_factory(self) -> StateStoreFactory {
    match self {
      StoreSelection::Local { root } => Box::new(move |id: &ScopeId| {
        let dir = root.join(&id.app).join(id.stage.as_str());
        Ok(Arc::new(LocalStateStore::new(dir, id.to_string())) as Arc<dyn StateStore>)
      }),
      StoreSelection::Remote {
        endpoint,
        script_name,
        token,
      } => Box::new(move |id: &ScopeId| {
        let token = token.ok_or(ConfigError::MissingStateToken)?;
        let endpoint = endpoint.ok_or(ConfigError::MissingStateEndpoint)?;
        Ok(Arc::new(RemoteStateStore::new(
          &endpoint,
          &script_name,
          &id.app,
          id.stage.as_str(),
          token,
        )) as Arc<dyn StateStore>)
      }),
    }
  }
}

/// A factory that always hands out the given store.
pub fn fixed_store(store: Arc<dyn StateStore>) -> StateStoreFactory {
  Box::new(move |_: &ScopeId| Ok(store))
}
