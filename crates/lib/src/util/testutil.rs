//! Test utilities for stagecraft-lib.
//!
//! [`RecordingProvider`] stands in for a platform: it records every call,
//! echoes its config back as outputs and can be told to fail for a name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::provider::{Provider, ProviderContext, ProviderError, ProviderRegistry};
use crate::scope::ScopeOptions;
use crate::secret::Secret;
use crate::stage::Stage;
use crate::state::{MemoryStateStore, fixed_store};
use crate::value::{Config, Outputs, Value};

pub const TEST_KIND: &str = "test::Thing";
pub const TEST_PASSWORD: &str = "correct horse battery staple";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Create(String),
  Update(String),
  Delete(String),
}

#[derive(Debug, Default)]
struct Recorded {
  calls: Vec<Call>,
  failing: HashSet<String>,
  next_id: u64,
}

#[derive(Debug, Clone)]
pub struct RecordingProvider {
  kind: &'static str,
  recorded: Arc<Mutex<Recorded>>,
}

impl RecordingProvider {
  pub fn new(kind: &'static str) -> Self {
    Self {
      kind,
      recorded: Arc::default(),
    }
  }

  pub fn calls(&self) -> Vec<Call> {
    self.recorded.lock().unwrap().calls.clone()
  }

  pub fn clear_calls(&self) {
    self.recorded.lock().unwrap().calls.clear();
  }

  /// Make every call for `name` fail until [`RecordingProvider::recover`].
  pub fn fail_on(&self, name: &str) {
    self.recorded.lock().unwrap().failing.insert(name.to_string());
  }

  pub fn recover(&self, name: &str) {
    self.recorded.lock().unwrap().failing.remove(name);
  }

  pub fn registry(&self) -> ProviderRegistry {
    ProviderRegistry::new().with(Arc::new(self.clone()))
  }

  fn record(&self, call: Call, name: &str) -> Result<u64, ProviderError> {
    let mut recorded = self.recorded.lock().unwrap();
    recorded.calls.push(call);
    if recorded.failing.contains(name) {
      return Err(ProviderError::Other(format!("injected failure for {}", name)));
    }
    recorded.next_id += 1;
    Ok(recorded.next_id)
  }
}

#[async_trait]
impl Provider for RecordingProvider {
  fn kind(&self) -> &'static str {
    self.kind
  }

  async fn create(&self, ctx: &ProviderContext<'_>, config: &Config) -> Result<Outputs, ProviderError> {
    let id = self.record(Call::Create(ctx.name.to_string()), ctx.name)?;
    let mut outputs = config.clone();
    outputs.insert("id".to_string(), Value::String(format!("{}-{}", ctx.name, id)));
    Ok(outputs)
  }

  async fn update(&self, ctx: &ProviderContext<'_>, config: &Config, prior: &Outputs) -> Result<Outputs, ProviderError> {
    self.record(Call::Update(ctx.name.to_string()), ctx.name)?;
    let id = prior
      .get("id")
      .cloned()
      .ok_or_else(|| ProviderError::MissingOutput("id".to_string()))?;
    let mut outputs = config.clone();
    outputs.insert("id".to_string(), id);
    Ok(outputs)
  }

  async fn delete(&self, ctx: &ProviderContext<'_>, _prior: &Outputs) -> Result<(), ProviderError> {
    self.record(Call::Delete(ctx.name.to_string()), ctx.name)?;
    Ok(())
  }
}

/// Scope options over an in-memory store with a cheap cipher.
pub fn memory_options(stage: &str, store: &MemoryStateStore, providers: ProviderRegistry) -> ScopeOptions {
  ScopeOptions::new(
    Stage::resolve(Some(stage.to_string())),
    Some(Secret::new(TEST_PASSWORD)),
    fixed_store(Arc::new(store.clone())),
  )
  .providers(providers)
  .work_factor(2)
}

/// Returns the argv of a shell running `script`.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["cmd.exe".to_string(), "/C".to_string(), script.to_string()]
}
