//! Remote state store backed by an HTTP state service.
//!
//! The service keeps one document per `{script}/{app}/{stage}` key:
//!
//! - `GET    {endpoint}/state/{script}/{app}/{stage}`       document, or 404 when empty
//! - `PUT    {endpoint}/state/{script}/{app}/{stage}`       replace the document
//! - `POST   {endpoint}/state/{script}/{app}/{stage}/lock`  take the scope lock, 409 when held
//! - `DELETE {endpoint}/state/{script}/{app}/{stage}/lock`  release it
//!
//! Every request carries the access token as a bearer credential.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::StateStore;
use super::types::{LockMode, StateDocument, StateError};
use crate::consts::{APP_NAME, STATE_VERSION};
use crate::secret::Secret;

#[derive(Debug)]
pub struct RemoteStateStore {
  client: reqwest::Client,
  endpoint: String,
  script_name: String,
  app: String,
  stage: String,
  token: Secret,
}

impl RemoteStateStore {
  pub fn new(endpoint: &str, script_name: &str, app: &str, stage: &str, token: Secret) -> Self {
    Self {
      client: reqwest::Client::new(),
      endpoint: endpoint.trim_end_matches('/').to_string(),
      script_name: script_name.to_string(),
      app: app.to_string(),
      stage: stage.to_string(),
      token,
    }
  }

  pub fn script_name(&self) -> &str {
    &self.script_name
  }

  fn document_url(&self) -> String {
    format!(
      "{}/state/{}/{}/{}",
      self.endpoint, self.script_name, self.app, self.stage
    )
  }

  fn lock_url(&self) -> String {
    format!("{}/lock", self.document_url())
  }

  fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .bearer_auth(self.token.expose())
      .header("User-Agent", APP_NAME)
  }
}

async fn status_error(response: reqwest::Response) -> StateError {
  let status = response.status().as_u16();
  let body = response.text().await.unwrap_or_default();
  StateError::Status { status, body }
}

#[async_trait]
impl StateStore for RemoteStateStore {
  fn describe(&self) -> String {
    format!("remote:{}", self.script_name)
  }

  async fn lock(&self, mode: LockMode) -> Result<(), StateError> {
    // Readers do not contend with the service lock.
    if mode == LockMode::Shared {
      return Ok(());
    }

    let response = self.request(reqwest::Method::POST, self.lock_url()).send().await?;
    match response.status() {
      s if s.is_success() => Ok(()),
      StatusCode::CONFLICT => {
        let holder = response.text().await.unwrap_or_default();
        Err(StateError::Locked(format!("{}/{} held remotely {}", self.app, self.stage, holder).trim_end().to_string()))
      }
      _ => Err(status_error(response).await),
    }
  }

  async fn unlock(&self) -> Result<(), StateError> {
    let response = self.request(reqwest::Method::DELETE, self.lock_url()).send().await?;
    if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
      return Ok(());
    }
    Err(status_error(response).await)
  }

  async fn load(&self) -> Result<Option<StateDocument>, StateError> {
    let response = self.request(reqwest::Method::GET, self.document_url()).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !response.status().is_success() {
      return Err(status_error(response).await);
    }

    let body = response.text().await?;
    let document: StateDocument = serde_json::from_str(&body).map_err(StateError::Parse)?;
    if document.version != STATE_VERSION {
      return Err(StateError::UnsupportedVersion(document.version));
    }
    Ok(Some(document))
  }

  async fn save(&self, document: &StateDocument) -> Result<(), StateError> {
    let body = serde_json::to_string(document).map_err(StateError::Serialize)?;
    let response = self
      .request(reqwest::Method::PUT, self.document_url())
      .header("Content-Type", "application/json")
      .body(body)
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(status_error(response).await);
    }

    debug!(script = %self.script_name, resources = document.resources.len(), "remote state saved");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  fn store(server: &mockito::ServerGuard) -> RemoteStateStore {
    RemoteStateStore::new(&server.url(), "app-state-prod", "app", "prod", Secret::new("tok"))
  }

  #[tokio::test]
  async fn missing_document_loads_as_none() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/state/app-state-prod/app/prod")
      .match_header("authorization", "Bearer tok")
      .with_status(404)
      .create_async()
      .await;

    assert!(store(&server).load().await.unwrap().is_none());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn save_puts_json_document() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("PUT", "/state/app-state-prod/app/prod")
      .match_header("authorization", "Bearer tok")
      .match_body(Matcher::PartialJsonString(r#"{"app":"app","stage":"prod"}"#.to_string()))
      .with_status(204)
      .create_async()
      .await;

    store(&server).save(&StateDocument::new("app", "prod")).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn load_parses_document() {
    let mut server = mockito::Server::new_async().await;
    let doc = StateDocument::new("app", "prod");
    server
      .mock("GET", "/state/app-state-prod/app/prod")
      .with_status(200)
      .with_body(serde_json::to_string(&doc).unwrap())
      .create_async()
      .await;

    assert_eq!(store(&server).load().await.unwrap(), Some(doc));
  }

  #[tokio::test]
  async fn conflicting_lock_is_reported_as_locked() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/state/app-state-prod/app/prod/lock")
      .with_status(409)
      .with_body("run 7")
      .create_async()
      .await;

    let err = store(&server).lock(LockMode::Exclusive).await.unwrap_err();
    assert!(matches!(err, StateError::Locked(detail) if detail.contains("run 7")));
  }

  #[tokio::test]
  async fn shared_lock_makes_no_request() {
    let server = mockito::Server::new_async().await;
    store(&server).lock(LockMode::Shared).await.unwrap();
  }

  #[tokio::test]
  async fn server_error_surfaces_status() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/state/app-state-prod/app/prod")
      .with_status(500)
      .with_body("boom")
      .create_async()
      .await;

    let err = store(&server).load().await.unwrap_err();
    assert!(matches!(err, StateError::Status { status: 500, ref body } if body == "boom"));
  }
}
