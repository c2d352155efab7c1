use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
  #[error("no valid HTTP response: {0}")]
  TransportUnavailable(String),

  #[error("request aborted: {0}")]
  Aborted(String),

  #[error("{}", unexpected_status_message(*code, body))]
  UnexpectedStatus { code: u16, body: Vec<u8> },

  #[error("response body missing")]
  EmptyBody,

  #[error("malformed response body: {0}")]
  MalformedBody(String),

  #[error("{0}")]
  ServerReported(MoatError),

  #[error("{kind}: {message}")]
  ProviderReported { kind: String, message: String },

  #[error("request could not be formed: {0}")]
  NoRequestPossible(String),

  #[error("couldn't understand server response")]
  NotUnderstandable,
}

impl ApiError {
  pub fn server_code(&self) -> Option<i64> {
    match self {
      ApiError::ServerReported(e) => e.code,
      _ => None,
    }
  }
}

fn unexpected_status_message(code: u16, body: &[u8]) -> String {
  let text = String::from_utf8_lossy(body);
  let text = text.trim();
  if text.is_empty() {
    return format!("unexpected HTTP status {code}");
  }
  format!("unexpected HTTP status {code}\n{text}")
}

/// One entry of the `{"errors": [...]}` envelope returned by the MOAT service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MoatError {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default, rename = "type")]
  pub kind: Option<String>,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub code: Option<i64>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub detail: Option<String>,
}

impl fmt::Display for MoatError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(detail) = self.detail.as_deref().filter(|d| !d.is_empty()) {
      return f.write_str(detail);
    }

    let mut parts = Vec::new();
    if let Some(code) = self.code {
      parts.push(code.to_string());
    }
    if let Some(status) = self.status.as_deref() {
      parts.push(status.to_string());
    }
    f.write_str(&parts.join(" "))
  }
}
