//! Deployment settings and process inputs.
//!
//! Static deployment shape lives in a TOML file (`stagecraft.toml` by
//! default). Stage, credentials and per-run identifiers come from
//! environment variables so the same file works in every stage.
//!
//! ```toml
//! [app]
//! name = "react-router-app"
//!
//! [worker]
//! name = "site"
//! main = "build/server/index.js"
//! build = ["npm", "run", "build"]
//! compatibility_date = "2025-04-01"
//!
//! [worker.bindings]
//! GREETING = "hello"
//! PUBLIC_VALUE_FROM_CLOUDFLARE = { env = "PUBLIC_VALUE_FROM_CLOUDFLARE" }
//! SECRET = { secret_env = "SECRET" }
//!
//! [preview_comment]
//! owner = "your-username"
//! repository = "your-repo"
//!
//! [state]
//! remote_url = "https://state.example.workers.dev"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::consts::{
  COMMIT_SHA_ENV, DEFAULT_STATE_DIR, PASSWORD_ENV, PULL_REQUEST_ENV, SHORT_SHA_LEN, STATE_DIR_ENV, STATE_TOKEN_ENV,
  STATE_URL_ENV,
};
use crate::provider::cloudflare::Binding;
use crate::secret::Secret;
use crate::stage::Stage;

/// Missing or malformed configuration. Always fatal before a scope opens.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("deployment password is required: set STAGECRAFT_PASSWORD")]
  MissingPassword,

  #[error("remote state requires an access token: set STAGECRAFT_STATE_TOKEN")]
  MissingStateToken,

  #[error("remote state requires an endpoint: set STAGECRAFT_STATE_URL or [state].remote_url")]
  MissingStateEndpoint,

  #[error("required input {0} is not set")]
  MissingInput(String),

  #[error("invalid value for {name}: {message}")]
  InvalidInput { name: String, message: String },

  #[error("failed to read settings file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

/// Contents of the settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
  pub app: AppSettings,
  pub worker: WorkerSettings,
  #[serde(default)]
  pub preview_comment: Option<CommentSettings>,
  #[serde(default)]
  pub state: StateSettings,
  /// Directory holding the settings file. Build commands run here.
  #[serde(skip)]
  pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSettings {
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
  /// Logical resource name of the worker.
  #[serde(default = "default_worker_name")]
  pub name: String,

  /// Platform script name. Defaults to `{name}-{stage}`.
  pub script_name: Option<String>,

  /// Bundled module entry point, relative to the settings file.
  pub main: PathBuf,

  /// Command run before upload to produce `main`.
  #[serde(default)]
  pub build: Option<Vec<String>>,

  pub compatibility_date: Option<String>,

  #[serde(default)]
  pub bindings: BTreeMap<String, BindingSource>,
}

fn default_worker_name() -> String {
  "site".to_string()
}

/// Where a binding's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BindingSource {
  /// A literal plain-text value.
  Literal(String),
  /// A plain-text value read from an environment variable.
  Env { env: String },
  /// A literal value wrapped as a secret.
  Secret { secret: String },
  /// A secret read from an environment variable.
  SecretEnv { secret_env: String },
}

impl BindingSource {
  /// Produce the binding, reading environment inputs as needed.
  pub fn resolve(&self) -> Result<Binding, ConfigError> {
    match self {
      BindingSource::Literal(value) => Ok(Binding::Plain(value.clone())),
      BindingSource::Env { env } => std::env::var(env)
        .map(Binding::Plain)
        .map_err(|_| ConfigError::MissingInput(env.clone())),
      BindingSource::Secret { secret } => Ok(Binding::Secret(Secret::new(secret.clone()))),
      BindingSource::SecretEnv { secret_env } => Secret::from_env(secret_env)
        .map(Binding::Secret)
        .ok_or_else(|| ConfigError::MissingInput(secret_env.clone())),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentSettings {
  pub owner: String,
  pub repository: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSettings {
  /// Base URL of the remote state service.
  pub remote_url: Option<String>,
  /// Prefix of the per-stage remote state name. Defaults to `{app}-state`.
  pub script_prefix: Option<String>,
  /// Root directory of the local state store.
  pub local_dir: Option<PathBuf>,
}

impl Settings {
  /// Load settings from a TOML file.
  ///
  /// A relative `worker.main` is resolved against the file's directory.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let mut settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    settings.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    if settings.worker.main.is_relative() {
      settings.worker.main = settings.base_dir.join(&settings.worker.main);
    }

    Ok(settings)
  }

  /// Resolve every worker binding.
  pub fn resolve_bindings(&self) -> Result<BTreeMap<String, Binding>, ConfigError> {
    self
      .worker
      .bindings
      .iter()
      .map(|(name, source)| Ok((name.clone(), source.resolve()?)))
      .collect()
  }
}

/// Per-run inputs read from the environment.
#[derive(Debug, Clone)]
pub struct RunInputs {
  pub stage: Stage,
  pub password: Option<Secret>,
  pub state_token: Option<Secret>,
  pub state_url: Option<String>,
  pub state_dir: Option<PathBuf>,
  pub pull_request: Option<u64>,
  pub commit_sha: Option<String>,
}

impl RunInputs {
  pub fn from_env() -> Result<Self, ConfigError> {
    let pull_request = match non_empty_env(PULL_REQUEST_ENV) {
      Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidInput {
        name: PULL_REQUEST_ENV.to_string(),
        message: e.to_string(),
      })?),
      None => None,
    };

    Ok(Self {
      stage: Stage::from_env(),
      password: Secret::from_env(PASSWORD_ENV),
      state_token: Secret::from_env(STATE_TOKEN_ENV),
      state_url: non_empty_env(STATE_URL_ENV),
      state_dir: non_empty_env(STATE_DIR_ENV).map(PathBuf::from),
      pull_request,
      commit_sha: non_empty_env(COMMIT_SHA_ENV),
    })
  }

  /// The deployment password, or a configuration error.
  pub fn require_password(&self) -> Result<&Secret, ConfigError> {
    self.password.as_ref().ok_or(ConfigError::MissingPassword)
  }

  /// The commit identifier truncated for display.
  pub fn short_sha(&self) -> Option<&str> {
    self.commit_sha.as_deref().map(|sha| match sha.char_indices().nth(SHORT_SHA_LEN) {
      Some((idx, _)) => &sha[..idx],
      None => sha,
    })
  }

  /// Local state root: explicit env, then settings, then the default.
  pub fn local_state_root(&self, settings: &StateSettings) -> PathBuf {
    self
      .state_dir
      .clone()
      .or_else(|| settings.local_dir.clone())
      .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
  }
}

fn non_empty_env(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
