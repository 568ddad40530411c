//! `github::Comment`: a single issue or pull request comment.
//!
//! The comment keeps its identity across runs through the `comment_id`
//! output, so redeclaring it with a new body edits it in place.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Provider, ProviderContext, ProviderError, require_integer, require_str};
use crate::consts::APP_NAME;
use crate::scope::{Declaration, ResourceHandle, Scope, ScopeError};
use crate::secret::Secret;
use crate::value::{Config, Outputs, Value};

pub const COMMENT_KIND: &str = "github::Comment";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentProps {
  pub owner: String,
  pub repository: String,
  pub issue_number: u64,
  /// Markdown body.
  pub body: String,
}

pub struct Comment;

impl Comment {
  pub fn declaration(name: &str, props: CommentProps) -> Result<Declaration, ScopeError> {
    let issue_number = i64::try_from(props.issue_number).map_err(|_| ScopeError::InvalidConfig {
      name: name.to_string(),
      message: format!("issue number {} is out of range", props.issue_number),
    })?;
    Ok(
      Declaration::new(name, COMMENT_KIND)
        .set("owner", props.owner)
        .set("repository", props.repository)
        .set("issue_number", Value::Integer(issue_number))
        .set("body", props.body),
    )
  }

  pub async fn declare(scope: &Scope, name: &str, props: CommentProps) -> Result<CommentHandle, ScopeError> {
    let resource = scope.declare(Self::declaration(name, props)?).await?;
    Ok(CommentHandle::new(resource))
  }
}

#[derive(Debug, Clone)]
pub struct CommentHandle {
  resource: ResourceHandle,
}

impl CommentHandle {
  pub fn new(resource: ResourceHandle) -> Self {
    Self { resource }
  }

  pub fn comment_id(&self) -> Option<i64> {
    self.resource.output("comment_id").and_then(Value::as_integer)
  }

  pub fn html_url(&self) -> Option<&str> {
    self.resource.output("html_url").and_then(Value::as_str)
  }

  pub fn resource(&self) -> &ResourceHandle {
    &self.resource
  }
}

#[derive(Debug, Deserialize)]
struct IssueComment {
  id: i64,
  html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiFailure {
  message: String,
}

/// Where a comment lives.
#[derive(Debug, PartialEq, Eq)]
struct Target<'a> {
  owner: &'a str,
  repository: &'a str,
  issue_number: i64,
}

impl<'a> Target<'a> {
  fn from_map(map: &'a Config) -> Result<Self, ProviderError> {
    Ok(Self {
      owner: require_str(map, "owner")?,
      repository: require_str(map, "repository")?,
      issue_number: require_integer(map, "issue_number")?,
    })
  }
}

/// Talks to the GitHub REST API.
#[derive(Debug, Clone)]
pub struct CommentProvider {
  client: reqwest::Client,
  api_base: String,
  token: Secret,
}

impl CommentProvider {
  pub fn new(token: Secret) -> Self {
    Self {
      client: reqwest::Client::new(),
      api_base: DEFAULT_API_BASE.to_string(),
      token,
    }
  }

  pub fn with_api_base(mut self, api_base: &str) -> Self {
    self.api_base = api_base.trim_end_matches('/').to_string();
    self
  }

  fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .bearer_auth(self.token.expose())
      .header("Accept", "application/vnd.github+json")
      .header("User-Agent", APP_NAME)
      .header("X-GitHub-Api-Version", API_VERSION)
  }

  fn comment_url(&self, target: &Target<'_>, id: i64) -> String {
    format!(
      "{}/repos/{}/{}/issues/comments/{}",
      self.api_base, target.owner, target.repository, id
    )
  }

  async fn post(&self, target: &Target<'_>, body: &str) -> Result<Outputs, ProviderError> {
    let url = format!(
      "{}/repos/{}/{}/issues/{}/comments",
      self.api_base, target.owner, target.repository, target.issue_number
    );
    let response = self
      .request(reqwest::Method::POST, url)
      .json(&json!({ "body": body }))
      .send()
      .await?;
    let comment = parse_comment(response).await?;
    info!(comment_id = comment.id, issue = target.issue_number, "comment created");
    Ok(outputs(target, comment))
  }

  async fn remove(&self, target: &Target<'_>, id: i64) -> Result<(), ProviderError> {
    let response = self
      .request(reqwest::Method::DELETE, self.comment_url(target, id))
      .send()
      .await?;
    match response.status() {
      s if s.is_success() => {
        info!(comment_id = id, "comment deleted");
        Ok(())
      }
      StatusCode::NOT_FOUND => {
        debug!(comment_id = id, "comment already gone");
        Ok(())
      }
      _ => Err(api_error(response).await),
    }
  }
}

#[async_trait]
impl Provider for CommentProvider {
  fn kind(&self) -> &'static str {
    COMMENT_KIND
  }

  async fn create(&self, _ctx: &ProviderContext<'_>, config: &Config) -> Result<Outputs, ProviderError> {
    let target = Target::from_map(config)?;
    self.post(&target, require_str(config, "body")?).await
  }

  async fn update(&self, _ctx: &ProviderContext<'_>, config: &Config, prior: &Outputs) -> Result<Outputs, ProviderError> {
    let target = Target::from_map(config)?;
    let body = require_str(config, "body")?;
    let previous = Target::from_map(prior)?;
    let id = prior
      .get("comment_id")
      .and_then(Value::as_integer)
      .ok_or_else(|| ProviderError::MissingOutput("comment_id".to_string()))?;

    // A comment cannot move between issues: post the new one, then drop the
    // old. The new comment is live once posted, so its outputs are returned
    // even if the old one cannot be removed.
    if target != previous {
      let outputs = self.post(&target, body).await?;
      if let Err(err) = self.remove(&previous, id).await {
        warn!(comment_id = id, issue = previous.issue_number, error = %err, "failed to delete the previous comment");
      }
      return Ok(outputs);
    }

    let response = self
      .request(reqwest::Method::PATCH, self.comment_url(&target, id))
      .json(&json!({ "body": body }))
      .send()
      .await?;
    if response.status() == StatusCode::NOT_FOUND {
      warn!(comment_id = id, "comment no longer exists, posting a new one");
      return self.post(&target, body).await;
    }
    let comment = parse_comment(response).await?;
    info!(comment_id = comment.id, "comment updated");
    Ok(outputs(&target, comment))
  }

  async fn delete(&self, _ctx: &ProviderContext<'_>, prior: &Outputs) -> Result<(), ProviderError> {
    let target = Target::from_map(prior)?;
    let id = prior
      .get("comment_id")
      .and_then(Value::as_integer)
      .ok_or_else(|| ProviderError::MissingOutput("comment_id".to_string()))?;
    self.remove(&target, id).await
  }
}

fn outputs(target: &Target<'_>, comment: IssueComment) -> Outputs {
  Outputs::from([
    ("comment_id".to_string(), Value::Integer(comment.id)),
    ("html_url".to_string(), Value::String(comment.html_url)),
    ("owner".to_string(), Value::from(target.owner)),
    ("repository".to_string(), Value::from(target.repository)),
    ("issue_number".to_string(), Value::Integer(target.issue_number)),
  ])
}

async fn parse_comment(response: reqwest::Response) -> Result<IssueComment, ProviderError> {
  if !response.status().is_success() {
    return Err(api_error(response).await);
  }
  Ok(response.json::<IssueComment>().await?)
}

async fn api_error(response: reqwest::Response) -> ProviderError {
  let status = response.status().as_u16();
  let body = response.text().await.unwrap_or_default();
  let message = serde_json::from_str::<ApiFailure>(&body)
    .map(|f| f.message)
    .unwrap_or(body);
  ProviderError::Api { status, message }
}
