use crate::error::{ApiError, MoatError};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Proxy, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
    self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.into()));
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
  #[error("{0}")]
  Unavailable(String),
  #[error("request cancelled")]
  Cancelled,
  #[error("request timed out")]
  TimedOut,
}

impl From<TransportError> for ApiError {
  fn from(e: TransportError) -> Self {
    match e {
      TransportError::Unavailable(msg) => ApiError::TransportUnavailable(msg),
      TransportError::Cancelled | TransportError::TimedOut => ApiError::Aborted(e.to_string()),
    }
  }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    (**self).send(request).await
  }
}

/// Hook run on every outgoing request right before it is sent, e.g. to add
/// credentials for a fronting service.
pub trait RequestAuthenticator: Send + Sync {
  fn authenticate(&self, request: &mut HttpRequest);
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  errors: Vec<MoatError>,
}

pub fn check_response(response: HttpResponse) -> Result<Vec<u8>, ApiError> {
  if response.status != 200 {
    return Err(ApiError::UnexpectedStatus {
      code: response.status,
      body: response.body,
    });
  }
  if response.body.is_empty() {
    return Err(ApiError::EmptyBody);
  }
  if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&response.body) {
    if let Some(error) = envelope.errors.into_iter().next() {
      return Err(ApiError::ServerReported(error));
    }
  }
  Ok(response.body)
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
  serde_json::from_slice(body).map_err(|e| ApiError::MalformedBody(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
  pub timeout: Duration,
  pub proxy: Option<Url>,
  pub max_body_bytes: usize,
}

impl Default for TransportOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      proxy: None,
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    }
  }
}

pub struct ReqwestTransport {
  client: Client,
  max_body_bytes: usize,
}

impl ReqwestTransport {
  pub fn new(options: &TransportOptions) -> anyhow::Result<Self> {
    let mut builder = Client::builder()
      .timeout(options.timeout)
      .redirect(Policy::none())
      .user_agent(format!("bridgeconf/{}", env!("CARGO_PKG_VERSION")));

    if let Some(proxy) = &options.proxy {
      let proxy = Proxy::all(proxy.clone())
        .with_context(|| format!("invalid proxy {}", safe_url_label(proxy)))?;
      builder = builder.proxy(proxy);
    }

    let client = builder.build().context("build HTTP client")?;
    Ok(Self {
      client,
      max_body_bytes: options.max_body_bytes,
    })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let label = safe_url_label(&request.url);
    let mut builder = self.client.request(request.method, request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(map_reqwest_error)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = read_response_with_limit(response, self.max_body_bytes).await?;

    tracing::debug!(url = %label, status, bytes = body.len(), "HTTP response");
    Ok(HttpResponse { status, headers, body })
  }
}

async fn read_response_with_limit(
  mut response: Response,
  max_bytes: usize,
) -> Result<Vec<u8>, TransportError> {
  let mut out = Vec::new();
  while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
    if out.len().saturating_add(chunk.len()) > max_bytes {
      return Err(TransportError::Unavailable(format!(
        "response exceeds max size {max_bytes} bytes"
      )));
    }
    out.extend_from_slice(&chunk);
  }
  Ok(out)
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    return TransportError::TimedOut;
  }
  TransportError::Unavailable(e.without_url().to_string())
}

/// Host and path only; query strings and credentials stay out of logs.
pub fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    pub requests: Mutex<Vec<HttpRequest>>,
  }

  impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
      Arc::new(Self {
        replies: Mutex::new(replies.into()),
        requests: Mutex::new(Vec::new()),
      })
    }

    pub fn paths(&self) -> Vec<String> {
      self
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
    }
  }

  #[async_trait]
  impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
      self.requests.lock().unwrap().push(request);
      self
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(TransportError::Unavailable("no scripted reply left".to_string())))
    }
  }

  pub fn ok_json(body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, body.as_bytes().to_vec()))
  }
}
