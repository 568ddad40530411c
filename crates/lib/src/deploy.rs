//! Deploy, destroy and inspect one application stage.
//!
//! `run_deploy` is the whole deployment program:
//!
//! 1. resolve bindings and credentials (fatal before anything is touched)
//! 2. run the build command, if one is configured
//! 3. open the scope on the store selected for the stage
//! 4. declare the worker
//! 5. for pull requests, declare the preview comment (best effort)
//! 6. finalize, pruning whatever the previous run declared and this one did not

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::consts::{
  CLOUDFLARE_ACCOUNT_ENV, CLOUDFLARE_TOKEN_ENV, GITHUB_TOKEN_ENV, PREVIEW_COMMENT_NAME, REDACTED,
};
use crate::projection::Env;
use crate::provider::ProviderRegistry;
use crate::provider::cloudflare::{WORKER_KIND, Worker, WorkerProps, WorkerProvider};
use crate::provider::github::{COMMENT_KIND, Comment, CommentHandle, CommentProps, CommentProvider};
use crate::scope::{FinalizeReport, Scope, ScopeError, ScopeId, ScopeOptions};
use crate::secret::Secret;
use crate::settings::{ConfigError, RunInputs, Settings};
use crate::state::{LockMode, StoreSettings, select_state_store};
use crate::value::StoredValue;

#[derive(Debug, Error)]
pub enum DeployError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Scope(#[from] ScopeError),

  #[error("build command is empty")]
  EmptyBuild,

  #[error("failed to start build command {command}: {source}")]
  BuildSpawn {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("build command {command} failed with {status}")]
  BuildFailed { command: String, status: String },
}

/// What `deploy` prints once the worker is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploySummary {
  pub url: Option<String>,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
  /// No pull request in this run.
  NotRequested,
  Skipped(String),
  Posted { url: Option<String> },
  Failed(String),
}

#[derive(Debug)]
pub struct DeployOutcome {
  pub summary: DeploySummary,
  pub script_name: Option<String>,
  /// Plain-text bindings the worker sees.
  pub env: Env,
  pub comment: CommentOutcome,
  pub report: FinalizeReport,
}

pub struct DeployOptions {
  pub settings: Settings,
  pub inputs: RunInputs,
  pub providers: ProviderRegistry,
  /// scrypt work factor override, mostly for tests.
  pub work_factor: Option<u8>,
  /// Run `worker.build` before uploading.
  pub build: bool,
}

/// Providers whose credentials are present in the environment.
pub fn providers_from_env() -> ProviderRegistry {
  let mut registry = ProviderRegistry::new();

  let account = std::env::var(CLOUDFLARE_ACCOUNT_ENV).ok().filter(|v| !v.is_empty());
  if let (Some(account), Some(token)) = (account, Secret::from_env(CLOUDFLARE_TOKEN_ENV)) {
    registry.register(std::sync::Arc::new(WorkerProvider::new(account, token)));
  }
  if let Some(token) = Secret::from_env(GITHUB_TOKEN_ENV) {
    registry.register(std::sync::Arc::new(CommentProvider::new(token)));
  }
  registry
}

/// Store inputs for the settings file and this run's environment.
pub fn store_settings(settings: &Settings, inputs: &RunInputs) -> StoreSettings {
  StoreSettings {
    local_root: inputs.local_state_root(&settings.state),
    remote_url: inputs.state_url.clone().or_else(|| settings.state.remote_url.clone()),
    script_prefix: settings.state.script_prefix.clone(),
    token: inputs.state_token.clone(),
  }
}

pub fn scope_options(
  settings: &Settings,
  inputs: &RunInputs,
  providers: ProviderRegistry,
  work_factor: Option<u8>,
) -> ScopeOptions {
  let selection = select_state_store(&inputs.stage, &settings.app.name, &store_settings(settings, inputs));
  ScopeOptions {
    stage: inputs.stage.clone(),
    password: inputs.password.clone(),
    state_store: selection.into_factory(),
    providers,
    cipher_work_factor: work_factor,
  }
}

/// Markdown body of the pull request preview comment.
pub fn render_preview_body(url: &str, short_sha: Option<&str>) -> String {
  format!(
    "## 🚀 Preview Deployed\n\
     \n\
     Your changes have been deployed to a preview environment:\n\
     \n\
     **🌐 Website:** {}\n\
     \n\
     Built from commit {}\n\
     \n\
     ---\n\
     <sub>🤖 This comment updates automatically with each push.</sub>",
    url,
    short_sha.unwrap_or("unknown")
  )
}

/// Run a build command to completion in `dir`.
pub async fn run_build(command: &[String], dir: &Path) -> Result<(), DeployError> {
  let (program, args) = command.split_first().ok_or(DeployError::EmptyBuild)?;
  let rendered = command.join(" ");
  info!(command = %rendered, "running build");

  let mut cmd = tokio::process::Command::new(program);
  cmd.args(args).stdin(Stdio::null());
  if !dir.as_os_str().is_empty() {
    cmd.current_dir(dir);
  }

  let status = cmd.status().await.map_err(|source| DeployError::BuildSpawn {
    command: rendered.clone(),
    source,
  })?;
  if !status.success() {
    return Err(DeployError::BuildFailed {
      command: rendered,
      status: status.to_string(),
    });
  }
  Ok(())
}

pub async fn run_deploy(options: DeployOptions) -> Result<DeployOutcome, DeployError> {
  let DeployOptions {
    settings,
    inputs,
    providers,
    work_factor,
    build,
  } = options;

  let bindings = settings.resolve_bindings()?;
  inputs.require_password()?;
  if providers.get(WORKER_KIND).is_none() {
    return Err(ConfigError::MissingInput(format!("{} and {}", CLOUDFLARE_ACCOUNT_ENV, CLOUDFLARE_TOKEN_ENV)).into());
  }

  let comment_target = match (inputs.pull_request, settings.preview_comment.clone()) {
    (None, _) => Err(CommentOutcome::NotRequested),
    (Some(_), None) => Err(CommentOutcome::Skipped("no [preview_comment] in settings".to_string())),
    (Some(_), Some(_)) if providers.get(COMMENT_KIND).is_none() => {
      Err(CommentOutcome::Skipped(format!("{} is not set", GITHUB_TOKEN_ENV)))
    }
    (Some(issue), Some(target)) => Ok((issue, target)),
  };

  if build {
    if let Some(command) = &settings.worker.build {
      run_build(command, &settings.base_dir).await?;
    }
  }

  let props = WorkerProps {
    script_name: settings.worker.script_name.clone(),
    main: settings.worker.main.clone(),
    compatibility_date: settings.worker.compatibility_date.clone(),
    bindings,
  };
  let worker_name = settings.worker.name.clone();
  let app_name = settings.app.name.clone();
  let short_sha = inputs.short_sha().map(str::to_string);

  let scope = Scope::open(&settings.app.name, scope_options(&settings, &inputs, providers, work_factor)).await?;
  let ((summary, script_name, env, comment), report) = scope
    .run(|scope| async move {
      let worker = Worker::declare(&scope, &worker_name, props).await?;
      let summary = DeploySummary {
        url: worker.url().map(str::to_string),
        name: app_name,
      };
      info!(url = ?summary.url, name = %summary.name, "worker deployed");

      let comment = match comment_target {
        Err(outcome) => outcome,
        Ok((issue_number, target)) => {
          let body = render_preview_body(summary.url.as_deref().unwrap_or("(no url)"), short_sha.as_deref());
          let props = CommentProps {
            owner: target.owner,
            repository: target.repository,
            issue_number,
            body,
          };
          declare_preview_comment(&scope, props).await
        }
      };

      Ok::<_, DeployError>((summary, worker.script_name().map(str::to_string), worker.env(), comment))
    })
    .await?;

  Ok(DeployOutcome {
    summary,
    script_name,
    env,
    comment,
    report,
  })
}

async fn declare_preview_comment(scope: &Scope, props: CommentProps) -> CommentOutcome {
  let declaration = match Comment::declaration(PREVIEW_COMMENT_NAME, props) {
    Ok(declaration) => declaration.best_effort(),
    Err(err) => {
      warn!(error = %err, "preview comment was not declared");
      return CommentOutcome::Failed(err.to_string());
    }
  };
  match scope.declare(declaration).await {
    Ok(resource) => CommentOutcome::Posted {
      url: CommentHandle::new(resource).html_url().map(str::to_string),
    },
    Err(err) => {
      warn!(error = %err, "preview comment was not updated");
      CommentOutcome::Failed(err.to_string())
    }
  }
}

/// Delete every resource recorded for the stage.
pub async fn run_destroy(
  settings: &Settings,
  inputs: &RunInputs,
  providers: ProviderRegistry,
  work_factor: Option<u8>,
) -> Result<FinalizeReport, DeployError> {
  inputs.require_password()?;
  let scope = Scope::open(&settings.app.name, scope_options(settings, inputs, providers, work_factor)).await?;
  info!(scope = %scope.id(), "destroying all resources");
  let ((), report) = scope.run(|_| async { Ok::<_, ScopeError>(()) }).await?;
  Ok(report)
}

/// Read-only view of a persisted state document.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
  pub scope: String,
  pub store: String,
  pub updated_at: u64,
  pub resources: Vec<ResourceView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
  pub name: String,
  pub kind: String,
  pub status: String,
  pub depends_on: Vec<String>,
  pub outputs: BTreeMap<String, String>,
}

/// Load the stage's state without decrypting it. `None` when nothing has been
/// deployed.
pub async fn load_state_view(settings: &Settings, inputs: &RunInputs) -> Result<Option<StateView>, DeployError> {
  let id = ScopeId::new(settings.app.name.clone(), inputs.stage.clone());
  let selection = select_state_store(&inputs.stage, &settings.app.name, &store_settings(settings, inputs));
  let store = (selection.into_factory())(&id)?;

  store.lock(LockMode::Shared).await.map_err(ScopeError::from)?;
  let loaded = store.load().await;
  if let Err(err) = store.unlock().await {
    warn!(error = %err, "failed to release state lock");
  }
  let Some(document) = loaded.map_err(ScopeError::from)? else {
    return Ok(None);
  };

  let mut resources: Vec<ResourceView> = document
    .resources
    .iter()
    .map(|(name, entry)| ResourceView {
      name: name.clone(),
      kind: entry.kind.clone(),
      status: format!("{:?}", entry.status).to_lowercase(),
      depends_on: entry.depends_on.clone(),
      outputs: entry
        .outputs
        .iter()
        .map(|(k, v)| (k.clone(), display_stored(v)))
        .collect(),
    })
    .collect();
  resources.sort_by_key(|r| {
    document
      .resources
      .get(&r.name)
      .map(|entry| entry.seq)
      .unwrap_or_default()
  });

  Ok(Some(StateView {
    scope: id.to_string(),
    store: store.describe(),
    updated_at: document.updated_at,
    resources,
  }))
}

fn display_stored(value: &StoredValue) -> String {
  match value {
    StoredValue::String(s) => s.clone(),
    StoredValue::Integer(n) => n.to_string(),
    StoredValue::Bool(b) => b.to_string(),
    StoredValue::Secret { .. } => REDACTED.to_string(),
    StoredValue::Ref(r) => format!("${{{}}}", r),
    StoredValue::List(items) => format!("[{}]", items.iter().map(display_stored).collect::<Vec<_>>().join(", ")),
    StoredValue::Map(map) => format!(
      "{{{}}}",
      map
        .iter()
        .map(|(k, v)| format!("{}: {}", k, display_stored(v)))
        .collect::<Vec<_>>()
        .join(", ")
    ),
  }
}
