//! Resource providers.
//!
//! A provider implements create, update and delete for one resource kind.
//! The scope decides *which* of the three to call; the provider only talks
//! to the platform.

pub mod cloudflare;
pub mod github;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::scope::ScopeId;
use crate::value::{Config, Outputs};

/// What a provider call is about.
#[derive(Debug, Clone, Copy)]
pub struct ProviderContext<'a> {
  pub scope: &'a ScopeId,
  /// Logical name of the resource.
  pub name: &'a str,
}

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("missing config field {0}")]
  MissingField(String),

  #[error("config field {field} has the wrong type: expected {expected}")]
  InvalidField { field: String, expected: &'static str },

  #[error("missing output {0} from a previous apply")]
  MissingOutput(String),

  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("api error ({status}): {message}")]
  Api { status: u16, message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Other(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
  /// Resource kind handled by this provider, e.g. `cloudflare::Worker`.
  fn kind(&self) -> &'static str;

  async fn create(&self, ctx: &ProviderContext<'_>, config: &Config) -> Result<Outputs, ProviderError>;

  async fn update(&self, ctx: &ProviderContext<'_>, config: &Config, prior: &Outputs) -> Result<Outputs, ProviderError>;

  async fn delete(&self, ctx: &ProviderContext<'_>, prior: &Outputs) -> Result<(), ProviderError>;
}

/// Providers available to a scope, keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  providers: HashMap<String, Arc<dyn Provider>>,
}

impl fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut kinds: Vec<&String> = self.providers.keys().collect();
    kinds.sort();
    f.debug_struct("ProviderRegistry").field("kinds", &kinds).finish()
  }
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a provider, replacing any previous one for the same kind.
  pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
    self.providers.insert(provider.kind().to_string(), provider);
    self
  }

  pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
    self.register(provider);
    self
  }

  pub fn get(&self, kind: &str) -> Option<Arc<dyn Provider>> {
    self.providers.get(kind).cloned()
  }
}

/// Typed field access for provider configs.
pub(crate) fn require_str<'a>(config: &'a Config, field: &str) -> Result<&'a str, ProviderError> {
  config
    .get(field)
    .ok_or_else(|| ProviderError::MissingField(field.to_string()))?
    .as_str()
    .ok_or_else(|| ProviderError::InvalidField {
      field: field.to_string(),
      expected: "string",
    })
}

pub(crate) fn require_integer(config: &Config, field: &str) -> Result<i64, ProviderError> {
  config
    .get(field)
    .ok_or_else(|| ProviderError::MissingField(field.to_string()))?
    .as_integer()
    .ok_or_else(|| ProviderError::InvalidField {
      field: field.to_string(),
      expected: "integer",
    })
}
