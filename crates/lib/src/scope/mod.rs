//! The scope: one deployment run of one application in one stage.
//!
//! A [`Scope`] is opened against a state store, receives resource
//! declarations in dependency order and is closed by [`Scope::finalize`],
//! which prunes whatever the previous run declared and this one did not.
//!
//! Lifecycle:
//!
//! 1. `open` takes the store lock and decrypts the prior document
//! 2. each `declare` reconciles immediately (create, update or nothing) and
//!    persists the working document after every provider mutation
//! 3. `finalize` deletes orphans dependents-first, saves and unlocks
//!
//! A failed reconciliation poisons the scope: later declarations are
//! refused and finalize releases the lock without pruning. `abort` does the
//! same release on purpose. [`Scope::run`] wraps a body so that one of the
//! two always happens.

mod plan;
mod prune;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use plan::PriorResource;
pub use types::{Change, Declaration, FinalizeReport, Phase, ResourceHandle, ScopeError, ScopeId};

use crate::provider::{ProviderContext, ProviderRegistry};
use crate::secret::{Secret, StateCipher};
use crate::settings::ConfigError;
use crate::stage::Stage;
use crate::state::{LockMode, ResourceState, ResourceStatus, StateDocument, StateError, StateStore, StateStoreFactory};
use crate::value::{Config, OutputRef, Value, seal_map, unseal_map};

use plan::{Plan, orphans, plan_declaration};
use prune::prune_order;

/// Everything [`Scope::open`] needs besides the application name.
pub struct ScopeOptions {
  pub stage: Stage,
  pub password: Option<Secret>,
  pub state_store: StateStoreFactory,
  pub providers: ProviderRegistry,
  /// scrypt work factor for newly sealed secrets; `None` keeps the default.
  pub cipher_work_factor: Option<u8>,
}

impl ScopeOptions {
  pub fn new(stage: Stage, password: Option<Secret>, state_store: StateStoreFactory) -> Self {
    Self {
      stage,
      password,
      state_store,
      providers: ProviderRegistry::new(),
      cipher_work_factor: None,
    }
  }

  pub fn providers(mut self, providers: ProviderRegistry) -> Self {
    self.providers = providers;
    self
  }

  pub fn work_factor(mut self, log_n: u8) -> Self {
    self.cipher_work_factor = Some(log_n);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Open,
  Poisoned,
  Closed,
}

#[derive(Debug)]
struct ScopeState {
  status: Status,
  /// Last persisted resource set, decrypted.
  prior: BTreeMap<String, PriorResource>,
  /// The document as it will be persisted next.
  working: StateDocument,
  /// Successfully reconciled in this run.
  declared: BTreeMap<String, ResourceHandle>,
  /// Every name declared in this run, including best-effort failures.
  claimed: BTreeSet<String>,
  seq: u64,
  report: FinalizeReport,
}

#[derive(Debug)]
struct ScopeInner {
  id: ScopeId,
  cipher: StateCipher,
  store: Arc<dyn StateStore>,
  providers: ProviderRegistry,
  state: Mutex<ScopeState>,
}

impl Drop for ScopeInner {
  fn drop(&mut self) {
    if self.state.get_mut().status != Status::Closed {
      warn!(scope = %self.id, "scope dropped without finalize or abort");
    }
  }
}

/// Handle to an open scope. Clones share the same run.
#[derive(Debug, Clone)]
pub struct Scope {
  inner: Arc<ScopeInner>,
}

impl Scope {
  /// Open the scope for `app` in `options.stage`.
  pub async fn open(app: &str, options: ScopeOptions) -> Result<Self, ScopeError> {
    let ScopeOptions {
      stage,
      password,
      state_store,
      providers,
      cipher_work_factor,
    } = options;

    let password = password
      .filter(|p| !p.expose().is_empty())
      .ok_or(ConfigError::MissingPassword)?;
    validate_name(app)?;

    let id = ScopeId::new(app, stage);
    let mut cipher = StateCipher::new(password);
    if let Some(log_n) = cipher_work_factor {
      cipher = cipher.with_work_factor(log_n);
    }

    let store = state_store(&id)?;
    info!(scope = %id, store = %store.describe(), "opening scope");

    store.lock(LockMode::Exclusive).await.map_err(|err| match err {
      StateError::Locked(holder) => ScopeError::Busy(holder),
      other => ScopeError::State(other),
    })?;

    let (working, prior) = match load_prior(store.as_ref(), &id, &cipher).await {
      Ok(loaded) => loaded,
      Err(err) => {
        if let Err(unlock_err) = store.unlock().await {
          warn!(error = %unlock_err, "failed to release state lock");
        }
        return Err(err);
      }
    };
    debug!(scope = %id, resources = prior.len(), "loaded prior state");

    Ok(Self {
      inner: Arc::new(ScopeInner {
        id,
        cipher,
        store,
        providers,
        state: Mutex::new(ScopeState {
          status: Status::Open,
          prior,
          working,
          declared: BTreeMap::new(),
          claimed: BTreeSet::new(),
          seq: 0,
          report: FinalizeReport::default(),
        }),
      }),
    })
  }

  pub fn id(&self) -> &ScopeId {
    &self.inner.id
  }

  pub fn app(&self) -> &str {
    &self.inner.id.app
  }

  pub fn stage(&self) -> &Stage {
    &self.inner.id.stage
  }

  /// Logical names recorded by the previous run, in name order.
  pub async fn prior_names(&self) -> Vec<String> {
    self.inner.state.lock().await.prior.keys().cloned().collect()
  }

  /// Reconcile one resource against prior state.
  pub async fn declare(&self, declaration: Declaration) -> Result<ResourceHandle, ScopeError> {
    let mut state = self.inner.state.lock().await;
    match state.status {
      Status::Open => {}
      Status::Poisoned => return Err(ScopeError::Poisoned(self.inner.id.clone())),
      Status::Closed => return Err(ScopeError::Closed(self.inner.id.clone())),
    }

    let name = declaration.name.clone();
    let best_effort = declaration.best_effort;

    match self.reconcile(&mut state, declaration).await {
      Ok(handle) => Ok(handle),
      Err(err @ ScopeError::Reconcile { .. }) if best_effort => {
        warn!(resource = %name, error = %err, "best-effort resource failed, continuing");
        state.report.failed.push(name);
        Err(err)
      }
      Err(err) => {
        error!(resource = %name, error = %err, "declaration failed, scope will not prune");
        state.status = Status::Poisoned;
        Err(err)
      }
    }
  }

  async fn reconcile(&self, state: &mut ScopeState, declaration: Declaration) -> Result<ResourceHandle, ScopeError> {
    let Declaration {
      name, kind, config, inputs, ..
    } = declaration;

    validate_name(&name)?;
    if !state.claimed.insert(name.clone()) {
      return Err(ScopeError::DuplicateName(name));
    }

    let provider = self
      .inner
      .providers
      .get(&kind)
      .ok_or_else(|| ScopeError::UnknownKind {
        name: name.clone(),
        kind: kind.clone(),
      })?;

    let depends_on: Vec<String> = config
      .values()
      .chain(inputs.values())
      .flat_map(|value| value.refs())
      .map(|target| target.resource.clone())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();

    let declared = &state.declared;
    let lookup = |target: &OutputRef| lookup_output(declared, &name, target);
    let resolved = config
      .iter()
      .map(|(key, value)| Ok((key.clone(), value.resolve(&lookup)?)))
      .collect::<Result<Config, ScopeError>>()?;
    let mut call = resolved.clone();
    for (key, value) in &inputs {
      if !call.contains_key(key) {
        call.insert(key.clone(), value.resolve(&lookup)?);
      }
    }

    let change = match plan_declaration(state.prior.get(&name), &kind, &resolved) {
      Plan::Apply(change) => change,
      Plan::KindChanged { previous } => {
        return Err(ScopeError::KindChanged { name, previous, kind });
      }
    };

    state.seq += 1;
    let seq = state.seq;
    let prior_outputs = state.prior.get(&name).map(|p| p.outputs.clone()).unwrap_or_default();
    let ctx = ProviderContext {
      scope: &self.inner.id,
      name: &name,
    };
    debug!(resource = %name, kind = %kind, change = ?change, "reconciling");

    let outputs = match change {
      Change::Unchanged => {
        if let Some(entry) = state.working.resources.get_mut(&name) {
          entry.seq = seq;
          entry.depends_on = depends_on;
        }
        info!(resource = %name, kind = %kind, "unchanged");
        state.report.unchanged.push(name.clone());
        prior_outputs
      }
      Change::Create => {
        let outputs = provider
          .create(&ctx, &call)
          .await
          .map_err(|source| ScopeError::Reconcile {
            name: name.clone(),
            phase: Phase::Create,
            source,
          })?;
        let entry = self.entry(&kind, ResourceStatus::Created, seq, depends_on, &resolved, &outputs)?;
        self.persist(state, &name, entry).await?;
        info!(resource = %name, kind = %kind, "created");
        state.report.created.push(name.clone());
        outputs
      }
      Change::Update => {
        let outputs = provider
          .update(&ctx, &call, &prior_outputs)
          .await
          .map_err(|source| ScopeError::Reconcile {
            name: name.clone(),
            phase: Phase::Update,
            source,
          })?;
        let entry = self.entry(&kind, ResourceStatus::Updated, seq, depends_on, &resolved, &outputs)?;
        self.persist(state, &name, entry).await?;
        info!(resource = %name, kind = %kind, "updated");
        state.report.updated.push(name.clone());
        outputs
      }
    };

    let handle = ResourceHandle {
      name: name.clone(),
      kind,
      outputs,
      change,
    };
    state.declared.insert(name, handle.clone());
    Ok(handle)
  }

  fn entry(
    &self,
    kind: &str,
    status: ResourceStatus,
    seq: u64,
    depends_on: Vec<String>,
    config: &Config,
    outputs: &BTreeMap<String, Value>,
  ) -> Result<ResourceState, ScopeError> {
    Ok(ResourceState {
      kind: kind.to_string(),
      status,
      seq,
      depends_on,
      config: seal_map(config, &self.inner.cipher)?,
      outputs: seal_map(outputs, &self.inner.cipher)?,
    })
  }

  async fn persist(&self, state: &mut ScopeState, name: &str, entry: ResourceState) -> Result<(), ScopeError> {
    state.working.resources.insert(name.to_string(), entry);
    state.working.touch();
    self.inner.store.save(&state.working).await?;
    Ok(())
  }

  /// Prune orphans, persist the declared set and release the scope.
  ///
  /// Calling it again after it has returned is a no-op with an empty report.
  pub async fn finalize(&self) -> Result<FinalizeReport, ScopeError> {
    let mut state = self.inner.state.lock().await;
    match state.status {
      Status::Open => {}
      Status::Closed => return Ok(FinalizeReport::default()),
      Status::Poisoned => {
        warn!(scope = %self.inner.id, "scope was poisoned, skipping prune");
        self.release(&mut state).await?;
        return Err(ScopeError::Poisoned(self.inner.id.clone()));
      }
    }

    let result = self.prune(&mut state).await;
    if let Err(err) = result {
      error!(scope = %self.inner.id, error = %err, "prune failed");
      self.release_quietly(&mut state).await;
      return Err(err);
    }

    state.working.touch();
    if let Err(err) = self.inner.store.save(&state.working).await {
      self.release_quietly(&mut state).await;
      return Err(err.into());
    }
    self.release(&mut state).await?;

    let report = std::mem::take(&mut state.report);
    info!(
      scope = %self.inner.id,
      created = report.created.len(),
      updated = report.updated.len(),
      unchanged = report.unchanged.len(),
      deleted = report.deleted.len(),
      "scope finalized"
    );
    Ok(report)
  }

  async fn prune(&self, state: &mut ScopeState) -> Result<(), ScopeError> {
    let orphaned = orphans(&state.prior, &state.claimed);
    if orphaned.is_empty() {
      return Ok(());
    }

    let order = prune_order(&orphaned, &state.prior)?;
    info!(count = order.len(), "pruning orphaned resources");

    for name in order {
      let Some(prior) = state.prior.get(&name).cloned() else {
        continue;
      };
      let provider = self
        .inner
        .providers
        .get(&prior.kind)
        .ok_or_else(|| ScopeError::UnknownKind {
          name: name.clone(),
          kind: prior.kind.clone(),
        })?;

      let ctx = ProviderContext {
        scope: &self.inner.id,
        name: &name,
      };
      provider
        .delete(&ctx, &prior.outputs)
        .await
        .map_err(|source| ScopeError::Prune {
          name: name.clone(),
          source,
        })?;

      state.working.resources.remove(&name);
      state.working.touch();
      self.inner.store.save(&state.working).await?;
      info!(resource = %name, kind = %prior.kind, "deleted");
      state.report.deleted.push(name);
    }
    Ok(())
  }

  /// Release the scope without pruning.
  pub async fn abort(&self) -> Result<(), ScopeError> {
    let mut state = self.inner.state.lock().await;
    if state.status == Status::Closed {
      return Ok(());
    }
    info!(scope = %self.inner.id, "aborting scope, nothing pruned");
    self.release(&mut state).await
  }

  /// Run `body` against this scope, then finalize on success or abort on
  /// error.
  pub async fn run<F, Fut, T, E>(&self, body: F) -> Result<(T, FinalizeReport), E>
  where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ScopeError>,
  {
    match body(self.clone()).await {
      Ok(value) => {
        let report = self.finalize().await?;
        Ok((value, report))
      }
      Err(err) => {
        if let Err(abort_err) = self.abort().await {
          warn!(error = %abort_err, "failed to release scope after error");
        }
        Err(err)
      }
    }
  }

  async fn release(&self, state: &mut ScopeState) -> Result<(), ScopeError> {
    state.status = Status::Closed;
    self.inner.store.unlock().await?;
    Ok(())
  }

  async fn release_quietly(&self, state: &mut ScopeState) {
    if let Err(err) = self.release(state).await {
      warn!(error = %err, "failed to release state lock");
    }
  }
}

async fn load_prior(
  store: &dyn StateStore,
  id: &ScopeId,
  cipher: &StateCipher,
) -> Result<(StateDocument, BTreeMap<String, PriorResource>), ScopeError> {
  let Some(document) = store.load().await? else {
    return Ok((StateDocument::new(&id.app, id.stage.as_str()), BTreeMap::new()));
  };

  if document.app != id.app || document.stage != id.stage.as_str() {
    return Err(
      StateError::ScopeMismatch {
        expected: id.to_string(),
        found: format!("{}/{}", document.app, document.stage),
      }
      .into(),
    );
  }

  let mut prior = BTreeMap::new();
  for (name, entry) in &document.resources {
    prior.insert(
      name.clone(),
      PriorResource {
        kind: entry.kind.clone(),
        config: unseal_map(&entry.config, cipher)?,
        outputs: unseal_map(&entry.outputs, cipher)?,
        depends_on: entry.depends_on.clone(),
      },
    );
  }
  Ok((document, prior))
}

fn lookup_output(declared: &BTreeMap<String, ResourceHandle>, name: &str, target: &OutputRef) -> Result<Value, ScopeError> {
  let handle = declared.get(&target.resource).ok_or_else(|| ScopeError::ForwardReference {
    name: name.to_string(),
    target: target.clone(),
  })?;
  handle.output(&target.output).cloned().ok_or_else(|| ScopeError::UnknownOutput {
    name: name.to_string(),
    target: target.clone(),
  })
}

/// Logical names and app names: `[A-Za-z0-9._-]+`.
pub(crate) fn validate_name(name: &str) -> Result<(), ScopeError> {
  let valid = !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
  if valid {
    Ok(())
  } else {
    Err(ScopeError::InvalidName(name.to_string()))
  }
}

#[cfg(test)]
mod tests;
