//! AWS Signature Version 4.

use crate::clock::Clock;
use crate::error::ApiError;
use crate::http::HttpRequest;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const AMZ_DATE_HEADER: &str = "X-Amz-Date";
const AMZ_HEADER_PREFIX: &str = "x-amz-";
const KEY_PREFIX: &str = "AWS4";
const TERMINATOR: &str = "aws4_request";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_STAMP_FORMAT: &str = "%Y%m%d";

#[derive(Clone)]
pub struct SigningContext {
  pub access_key: String,
  secret_key: String,
  pub region: String,
  pub service: String,
  pub timestamp: DateTime<Utc>,
}

impl SigningContext {
  pub fn new(
    access_key: impl Into<String>,
    secret_key: impl Into<String>,
    region: &str,
    service: &str,
    clock: &dyn Clock,
  ) -> Self {
    Self::at(access_key, secret_key, region, service, clock.now())
  }

  pub fn at(
    access_key: impl Into<String>,
    secret_key: impl Into<String>,
    region: &str,
    service: &str,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      access_key: access_key.into(),
      secret_key: secret_key.into(),
      region: region.to_ascii_lowercase(),
      service: service.to_ascii_lowercase(),
      timestamp,
    }
  }

  /// `20150830T123600Z`
  pub fn amz_date(&self) -> String {
    self.timestamp.format(AMZ_DATE_FORMAT).to_string()
  }

  pub fn date_stamp(&self) -> String {
    self.timestamp.format(DATE_STAMP_FORMAT).to_string()
  }

  /// `date/region/service/aws4_request`
  pub fn scope(&self) -> String {
    format!("{}/{}/{}/{TERMINATOR}", self.date_stamp(), self.region, self.service)
  }

  pub fn signing_key(&self) -> Result<Vec<u8>, ApiError> {
    let secret = format!("{KEY_PREFIX}{}", self.secret_key);
    let mut key = hmac(secret.as_bytes(), self.date_stamp().as_bytes())?;
    for part in [self.region.as_str(), self.service.as_str(), TERMINATOR] {
      key = hmac(&key, part.as_bytes())?;
    }
    Ok(key)
  }
}

impl fmt::Debug for SigningContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SigningContext")
      .field("access_key", &self.access_key)
      .field("secret_key", &"<redacted>")
      .field("region", &self.region)
      .field("service", &self.service)
      .field("timestamp", &self.timestamp)
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
  text: String,
  signed_headers: String,
}

impl CanonicalRequest {
  pub fn from_request(request: &HttpRequest) -> Result<Self, ApiError> {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &request.headers {
      let name = name.to_ascii_lowercase();
      if name != "host" && !name.starts_with(AMZ_HEADER_PREFIX) {
        continue;
      }
      headers.entry(name).or_default().push(collapse_whitespace(value));
    }
    if !headers.contains_key("host") {
      return Err(ApiError::NoRequestPossible("missing Host header".to_string()));
    }

    let signed_headers = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");
    let mut text = String::new();
    text.push_str(request.method.as_str());
    text.push('\n');
    text.push_str(&canonical_uri(request));
    text.push('\n');
    text.push_str(&canonical_query(request.url.query()));
    text.push('\n');
    for (name, values) in &headers {
      text.push_str(name);
      text.push(':');
      text.push_str(&values.join(","));
      text.push('\n');
    }
    text.push('\n');
    text.push_str(&signed_headers);
    text.push('\n');
    text.push_str(&sha256_hex(request.body.as_deref().unwrap_or_default()));

    Ok(Self { text, signed_headers })
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }

  pub fn signed_headers(&self) -> &str {
    &self.signed_headers
  }

  pub fn hash(&self) -> String {
    sha256_hex(self.text.as_bytes())
  }
}

pub fn string_to_sign(ctx: &SigningContext, canonical: &CanonicalRequest) -> String {
  format!("{ALGORITHM}\n{}\n{}\n{}", ctx.amz_date(), ctx.scope(), canonical.hash())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
  pub credential: String,
  pub signed_headers: String,
  pub signature: String,
}

impl fmt::Display for Authorization {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{ALGORITHM} Credential={}, SignedHeaders={}, Signature={}",
      self.credential, self.signed_headers, self.signature
    )
  }
}

pub fn authorization(
  ctx: &SigningContext,
  request: &HttpRequest,
) -> Result<Authorization, ApiError> {
  let canonical = CanonicalRequest::from_request(request)?;
  let to_sign = string_to_sign(ctx, &canonical);
  let signature = hex::encode(hmac(&ctx.signing_key()?, to_sign.as_bytes())?);

  Ok(Authorization {
    credential: format!("{}/{}", ctx.access_key, ctx.scope()),
    signed_headers: canonical.signed_headers,
    signature,
  })
}

/// Adds `X-Amz-Date` when missing, then the `Authorization` header.
pub fn sign(ctx: &SigningContext, request: &mut HttpRequest) -> Result<(), ApiError> {
  if request.header(AMZ_DATE_HEADER).is_none() {
    request.set_header(AMZ_DATE_HEADER, ctx.amz_date());
  }
  let auth = authorization(ctx, request)?;
  request.set_header("Authorization", auth.to_string());
  Ok(())
}

fn canonical_uri(request: &HttpRequest) -> String {
  match request.url.path() {
    "" => "/".to_string(),
    path => path.to_string(),
  }
}

// Pairs sorted by key then value; values are taken as already encoded.
fn canonical_query(query: Option<&str>) -> String {
  let Some(query) = query.filter(|q| !q.is_empty()) else {
    return String::new();
  };
  let mut pairs: Vec<(&str, &str)> = query
    .split('&')
    .filter(|p| !p.is_empty())
    .map(|p| p.split_once('=').unwrap_or((p, "")))
    .collect();
  pairs.sort_unstable();
  pairs
    .iter()
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join("&")
}

fn collapse_whitespace(value: &str) -> String {
  value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ApiError> {
  let mut mac = HmacSha256::new_from_slice(key)
    .map_err(|_| ApiError::NoRequestPossible("invalid signing key".to_string()))?;
  mac.update(data);
  Ok(mac.finalize().into_bytes().to_vec())
}
