//! `cloudflare::Worker`: an edge worker script with its bindings.
//!
//! Deploying a worker is three calls against the Workers API:
//!
//! 1. `PUT  /accounts/{account}/workers/scripts/{script}` with the module and
//!    a metadata part listing `plain_text` / `secret_text` bindings
//! 2. `GET  /accounts/{account}/workers/subdomain` for the account subdomain
//! 3. `POST /accounts/{account}/workers/scripts/{script}/subdomain` to enable
//!    the `workers.dev` route
//!
//! The reported URL is `https://{script}.{subdomain}.workers.dev`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Provider, ProviderContext, ProviderError, require_str};
use crate::consts::APP_NAME;
use crate::projection::{Env, project};
use crate::scope::{Declaration, ResourceHandle, Scope, ScopeError};
use crate::secret::Secret;
use crate::util::hash::hash_file;
use crate::value::{Config, OutputRef, Outputs, Value};

pub const WORKER_KIND: &str = "cloudflare::Worker";

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// A named entry in a worker's environment.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
  Plain(String),
  Secret(Secret),
}

impl From<Binding> for Value {
  fn from(binding: Binding) -> Self {
    match binding {
      Binding::Plain(text) => Value::String(text),
      Binding::Secret(secret) => Value::Secret(secret),
    }
  }
}

#[derive(Debug, Clone)]
pub struct WorkerProps {
  /// Script name on the platform. Defaults to `{name}-{stage}`.
  pub script_name: Option<String>,
  /// Built module entry point.
  pub main: PathBuf,
  pub compatibility_date: Option<String>,
  pub bindings: BTreeMap<String, Binding>,
}

pub struct Worker;

impl Worker {
  /// Declare a worker in `scope`.
  ///
  /// The script content hash is part of the config, so a rebuilt bundle is
  /// an update even when nothing else changed. The bundle path itself is only
  /// an input: the same bundle reached through another path is unchanged.
  pub async fn declare(scope: &Scope, name: &str, props: WorkerProps) -> Result<WorkerHandle, ScopeError> {
    let script_hash = hash_file(&props.main).map_err(|e| ScopeError::InvalidConfig {
      name: name.to_string(),
      message: format!("cannot read worker script {}: {}", props.main.display(), e),
    })?;
    let script_name = props
      .script_name
      .unwrap_or_else(|| format!("{}-{}", name, scope.stage()));

    let bindings: BTreeMap<String, Value> = props.bindings.into_iter().map(|(k, v)| (k, v.into())).collect();

    let mut declaration = Declaration::new(name, WORKER_KIND)
      .set("script_name", script_name)
      .set("module", module_name(&props.main))
      .set("script_hash", script_hash.0)
      .input("main", props.main.display().to_string())
      .set("bindings", Value::Map(bindings));
    if let Some(date) = props.compatibility_date {
      declaration = declaration.set("compatibility_date", date);
    }

    let resource = scope.declare(declaration).await?;
    Ok(WorkerHandle { resource })
  }
}

/// A reconciled worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
  resource: ResourceHandle,
}

impl WorkerHandle {
  pub fn url(&self) -> Option<&str> {
    self.resource.output("url").and_then(Value::as_str)
  }

  pub fn script_name(&self) -> Option<&str> {
    self.resource.output("name").and_then(Value::as_str)
  }

  /// Plain-text bindings as the worker sees them at runtime.
  pub fn env(&self) -> Env {
    self
      .resource
      .output("bindings")
      .and_then(Value::as_map)
      .map(project)
      .unwrap_or_default()
  }

  pub fn url_ref(&self) -> OutputRef {
    self.resource.output_ref("url")
  }

  pub fn resource(&self) -> &ResourceHandle {
    &self.resource
  }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
  success: bool,
  #[serde(default)]
  errors: Vec<ApiMessage>,
  result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
  code: i64,
  message: String,
}

#[derive(Debug, Deserialize)]
struct Subdomain {
  subdomain: String,
}

/// Talks to the Cloudflare Workers API.
#[derive(Debug, Clone)]
pub struct WorkerProvider {
  client: reqwest::Client,
  api_base: String,
  account_id: String,
  token: Secret,
}

impl WorkerProvider {
  pub fn new(account_id: impl Into<String>, token: Secret) -> Self {
    Self {
      client: reqwest::Client::new(),
      api_base: DEFAULT_API_BASE.to_string(),
      account_id: account_id.into(),
      token,
    }
  }

  pub fn with_api_base(mut self, api_base: &str) -> Self {
    self.api_base = api_base.trim_end_matches('/').to_string();
    self
  }

  fn scripts_url(&self, script: &str) -> String {
    format!("{}/accounts/{}/workers/scripts/{}", self.api_base, self.account_id, script)
  }

  fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .bearer_auth(self.token.expose())
      .header("User-Agent", APP_NAME)
  }

  async fn deploy(&self, config: &Config) -> Result<Outputs, ProviderError> {
    let script = require_str(config, "script_name")?;
    let main = PathBuf::from(require_str(config, "main")?);
    let module_name = module_name(&main);
    let content = tokio::fs::read(&main).await?;

    let mut metadata = json!({
      "main_module": module_name,
      "bindings": binding_metadata(config)?,
    });
    if let Some(date) = config.get("compatibility_date").and_then(Value::as_str) {
      metadata["compatibility_date"] = json!(date);
    }

    let form = Form::new()
      .part("metadata", Part::text(metadata.to_string()).mime_str("application/json")?)
      .part(
        module_name.clone(),
        Part::bytes(content)
          .file_name(module_name)
          .mime_str("application/javascript+module")?,
      );

    debug!(script, "uploading worker script");
    let response = self
      .request(reqwest::Method::PUT, self.scripts_url(script))
      .multipart(form)
      .send()
      .await?;
    parse_envelope::<serde_json::Value>(response).await?;

    let response = self
      .request(
        reqwest::Method::GET,
        format!("{}/accounts/{}/workers/subdomain", self.api_base, self.account_id),
      )
      .send()
      .await?;
    let subdomain = parse_envelope::<Subdomain>(response)
      .await?
      .ok_or_else(|| ProviderError::Other("account has no workers.dev subdomain".to_string()))?
      .subdomain;

    let response = self
      .request(reqwest::Method::POST, format!("{}/subdomain", self.scripts_url(script)))
      .json(&json!({ "enabled": true }))
      .send()
      .await?;
    parse_envelope::<serde_json::Value>(response).await?;

    let url = format!("https://{}.{}.workers.dev", script, subdomain);
    info!(script, url = %url, "worker deployed");

    let mut outputs = Outputs::new();
    outputs.insert("name".to_string(), Value::from(script));
    outputs.insert("url".to_string(), Value::String(url));
    outputs.insert("account_id".to_string(), Value::String(self.account_id.clone()));
    if let Some(bindings) = config.get("bindings") {
      outputs.insert("bindings".to_string(), bindings.clone());
    }
    Ok(outputs)
  }

  async fn delete_script(&self, script: &str) -> Result<(), ProviderError> {
    let response = self
      .request(reqwest::Method::DELETE, self.scripts_url(script))
      .send()
      .await?;
    if response.status() == StatusCode::NOT_FOUND {
      debug!(script, "worker script already gone");
      return Ok(());
    }
    parse_envelope::<serde_json::Value>(response).await?;
    info!(script, "worker script deleted");
    Ok(())
  }
}

#[async_trait]
impl Provider for WorkerProvider {
  fn kind(&self) -> &'static str {
    WORKER_KIND
  }

  async fn create(&self, _ctx: &ProviderContext<'_>, config: &Config) -> Result<Outputs, ProviderError> {
    self.deploy(config).await
  }

  async fn update(&self, _ctx: &ProviderContext<'_>, config: &Config, prior: &Outputs) -> Result<Outputs, ProviderError> {
    let outputs = self.deploy(config).await?;

    let previous = prior.get("name").and_then(Value::as_str);
    let current = outputs.get("name").and_then(Value::as_str);
    match previous {
      Some(previous) if Some(previous) != current => {
        // The renamed script is already live; a leftover old script is only logged.
        if let Err(err) = self.delete_script(previous).await {
          warn!(script = previous, error = %err, "failed to delete the previous worker script");
        }
      }
      _ => {}
    }
    Ok(outputs)
  }

  async fn delete(&self, _ctx: &ProviderContext<'_>, prior: &Outputs) -> Result<(), ProviderError> {
    let script = prior
      .get("name")
      .and_then(Value::as_str)
      .ok_or_else(|| ProviderError::MissingOutput("name".to_string()))?;
    self.delete_script(script).await
  }
}

fn module_name(main: &Path) -> String {
  main
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "index.js".to_string())
}

fn binding_metadata(config: &Config) -> Result<Vec<serde_json::Value>, ProviderError> {
  let Some(bindings) = config.get("bindings") else {
    return Ok(Vec::new());
  };
  let bindings = bindings.as_map().ok_or_else(|| ProviderError::InvalidField {
    field: "bindings".to_string(),
    expected: "map",
  })?;

  bindings
    .iter()
    .map(|(name, value)| match value {
      Value::String(text) => Ok(json!({ "type": "plain_text", "name": name, "text": text })),
      Value::Secret(secret) => Ok(json!({ "type": "secret_text", "name": name, "text": secret.expose() })),
      _ => Err(ProviderError::InvalidField {
        field: format!("bindings.{}", name),
        expected: "string or secret",
      }),
    })
    .collect()
}

async fn parse_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>, ProviderError> {
  let status = response.status();
  let body = response.text().await?;

  let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|_| ProviderError::Api {
    status: status.as_u16(),
    message: body.clone(),
  })?;

  if !status.is_success() || !envelope.success {
    let message = envelope
      .errors
      .iter()
      .map(|e| format!("{} ({})", e.message, e.code))
      .collect::<Vec<_>>()
      .join("; ");
    return Err(ProviderError::Api {
      status: status.as_u16(),
      message,
    });
  }
  Ok(envelope.result)
}
