//! The deployed worker's request entry point.
//!
//! The edge platform calls `fetch(request, bindings, ctx)`. The entry narrows
//! the raw bindings to their plain-text projection and hands them to the
//! application's request handler as its load context.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::projection::{Env, project};
use crate::value::Outputs;

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      url: url.into(),
      headers: BTreeMap::new(),
      body: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: StatusCode,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
    Self {
      status,
      headers: BTreeMap::from([("content-type".to_string(), "text/plain; charset=utf-8".to_string())]),
      body: body.into().into_bytes(),
    }
  }
}

/// Lets a handler schedule work that outlives the response.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keep the invocation alive until `task` completes.
  pub fn wait_until<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self
      .tasks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .spawn(task);
  }

  pub fn pending(&self) -> usize {
    self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
  }

  /// Wait for every task scheduled so far.
  pub async fn settle(&self) {
    let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "background task failed");
      }
    }
  }
}

/// What the request handler receives besides the request.
#[derive(Debug, Clone)]
pub struct LoadContext {
  pub env: Env,
  pub ctx: ExecutionContext,
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
  async fn handle(&self, request: Request, load: LoadContext) -> Response;
}

pub struct EdgeEntry<H> {
  handler: H,
}

impl<H: RequestHandler> EdgeEntry<H> {
  pub fn new(handler: H) -> Self {
    Self { handler }
  }

  pub async fn fetch(&self, request: Request, bindings: &Outputs, ctx: ExecutionContext) -> Response {
    let env = project(bindings);
    debug!(method = %request.method, url = %request.url, bindings = env.len(), "handling request");
    self.handler.handle(request, LoadContext { env, ctx }).await
  }
}
