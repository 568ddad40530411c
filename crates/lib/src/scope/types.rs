use std::fmt;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::secret::SecretError;
use crate::settings::ConfigError;
use crate::stage::Stage;
use crate::state::StateError;
use crate::value::{Config, OutputRef, Outputs, Value};

/// Identity of a scope: one application in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId {
  pub app: String,
  pub stage: Stage,
}

impl ScopeId {
  pub fn new(app: impl Into<String>, stage: Stage) -> Self {
    Self { app: app.into(), stage }
  }
}

impl fmt::Display for ScopeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.app, self.stage)
  }
}

/// Which provider operation a reconciliation step ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Create,
  Update,
  Delete,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Phase::Create => f.write_str("create"),
      Phase::Update => f.write_str("update"),
      Phase::Delete => f.write_str("delete"),
    }
  }
}

/// How a declaration was reconciled against prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
  Create,
  Update,
  Unchanged,
}

#[derive(Debug, Error)]
pub enum ScopeError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("state store error: {0}")]
  State(#[from] StateError),

  #[error("secret error: {0}")]
  Secret(#[from] SecretError),

  #[error("scope is in use by another run: {0}")]
  Busy(String),

  #[error("invalid name {0:?}: use letters, digits, '.', '_' or '-'")]
  InvalidName(String),

  #[error("invalid config for resource {name}: {message}")]
  InvalidConfig { name: String, message: String },

  #[error("resource {0} is declared more than once in this run")]
  DuplicateName(String),

  #[error("resource {name} references {target}, which has not been declared yet")]
  ForwardReference { name: String, target: OutputRef },

  #[error("resource {name} references {target}, which is not an output of that resource")]
  UnknownOutput { name: String, target: OutputRef },

  #[error("no provider registered for kind {kind} (resource {name})")]
  UnknownKind { name: String, kind: String },

  #[error("resource {name} was previously a {previous}, cannot redeclare it as {kind}")]
  KindChanged {
    name: String,
    previous: String,
    kind: String,
  },

  #[error("failed to {phase} resource {name}: {source}")]
  Reconcile {
    name: String,
    phase: Phase,
    #[source]
    source: ProviderError,
  },

  #[error("failed to delete orphaned resource {name}: {source}")]
  Prune {
    name: String,
    #[source]
    source: ProviderError,
  },

  #[error("dependency cycle among orphaned resources")]
  Cycle,

  #[error("scope {0} was aborted by an earlier failure; nothing was pruned")]
  Poisoned(ScopeId),

  #[error("scope {0} is already closed")]
  Closed(ScopeId),
}

impl ScopeError {
  /// Logical name of the resource the error is about, if any.
  pub fn resource(&self) -> Option<&str> {
    match self {
      ScopeError::InvalidConfig { name, .. }
      | ScopeError::ForwardReference { name, .. }
      | ScopeError::UnknownOutput { name, .. }
      | ScopeError::UnknownKind { name, .. }
      | ScopeError::KindChanged { name, .. }
      | ScopeError::Reconcile { name, .. }
      | ScopeError::Prune { name, .. } => Some(name),
      ScopeError::DuplicateName(name) => Some(name),
      _ => None,
    }
  }
}

/// A resource to reconcile, built up field by field.
#[derive(Debug, Clone)]
pub struct Declaration {
  pub(crate) name: String,
  pub(crate) kind: String,
  pub(crate) config: Config,
  /// Handed to the provider with the config but never recorded or compared.
  pub(crate) inputs: Config,
  pub(crate) best_effort: bool,
}

impl Declaration {
  pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: kind.into(),
      config: Config::new(),
      inputs: Config::new(),
      best_effort: false,
    }
  }

  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.config.insert(key.into(), value.into());
    self
  }

  /// Pass a value to the provider without making it part of the desired
  /// state. Suits local details such as file paths, which may be spelled
  /// differently on every machine that runs the deployment.
  pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.inputs.insert(key.into(), value.into());
    self
  }

  /// A failure to reconcile this resource is reported but does not abort
  /// the run.
  pub fn best_effort(mut self) -> Self {
    self.best_effort = true;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A reconciled resource and its outputs.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
  pub(crate) name: String,
  pub(crate) kind: String,
  pub(crate) outputs: Outputs,
  pub(crate) change: Change,
}

impl ResourceHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn outputs(&self) -> &Outputs {
    &self.outputs
  }

  pub fn output(&self, key: &str) -> Option<&Value> {
    self.outputs.get(key)
  }

  /// A reference to one of this resource's outputs, for use in a later
  /// declaration's config.
  pub fn output_ref(&self, key: &str) -> OutputRef {
    OutputRef::new(self.name.clone(), key)
  }

  pub fn change(&self) -> Change {
    self.change
  }
}

/// What a run changed, by logical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
  pub created: Vec<String>,
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
  pub deleted: Vec<String>,
  /// Best-effort resources that failed to reconcile.
  pub failed: Vec<String>,
}

impl FinalizeReport {
  /// True when no provider mutation happened.
  pub fn is_noop(&self) -> bool {
    self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
  }
}
