use crate::country::CountryCode;
use crate::error::ApiError;
use crate::http::{check_response, decode_json, HttpRequest, HttpTransport, RequestAuthenticator};
use reqwest::{Method, Url};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod schema;
pub mod tunnel;

pub use schema::{BridgeSource, Setting, SettingsRequest, SettingsResponse, TransportKind};
pub use tunnel::MoatTunnel;

pub const MOAT_BASE_URL: &str = "https://bridges.torproject.org/moat";
pub const MOAT_CONTENT_TYPE: &str = "application/vnd.api+json";

pub const DEFAULT_TRANSPORTS: [&str; 2] = ["obfs4", "snowflake"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Settings { country: Option<CountryCode> },
  Defaults,
  Map,
  Builtin,
  Countries,
}

impl Endpoint {
  pub fn path(&self) -> &'static str {
    match self {
      Endpoint::Settings { .. } => "circumvention/settings",
      Endpoint::Defaults => "circumvention/defaults",
      Endpoint::Map => "circumvention/map",
      Endpoint::Builtin => "circumvention/builtin",
      Endpoint::Countries => "circumvention/countries",
    }
  }
}

pub struct MoatClient<T> {
  transport: T,
  base_url: Url,
  transports: Vec<String>,
  authenticator: Option<Arc<dyn RequestAuthenticator>>,
}

impl<T: HttpTransport> MoatClient<T> {
  pub fn new(transport: T, base_url: Url) -> Self {
    Self {
      transport,
      base_url,
      transports: DEFAULT_TRANSPORTS.iter().map(|t| t.to_string()).collect(),
      authenticator: None,
    }
  }

  pub fn with_transports(mut self, transports: Vec<String>) -> Self {
    self.transports = transports;
    self
  }

  pub fn with_authenticator(mut self, authenticator: Arc<dyn RequestAuthenticator>) -> Self {
    self.authenticator = Some(authenticator);
    self
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn build_request(&self, endpoint: &Endpoint) -> Result<HttpRequest, ApiError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| {
        ApiError::NoRequestPossible(format!("base URL {} cannot take a path", self.base_url))
      })?
      .pop_if_empty()
      .extend(endpoint.path().split('/'));

    let country = match endpoint {
      Endpoint::Settings { country } => Some(country.as_ref().map(|c| c.as_str().to_string())),
      Endpoint::Defaults => Some(None),
      _ => None,
    };

    let Some(country) = country else {
      return Ok(HttpRequest::new(Method::GET, url));
    };

    let body = SettingsRequest {
      country,
      transports: self.transports.clone(),
    };
    let body = serde_json::to_vec(&body).map_err(|e| ApiError::NoRequestPossible(e.to_string()))?;

    let mut request = HttpRequest::new(Method::POST, url);
    request.set_header("Content-Type", MOAT_CONTENT_TYPE);
    request.body = Some(body);
    Ok(request)
  }

  /// Recommended settings for a location. Without a country the service
  /// guesses from the requesting address.
  pub async fn settings(
    &self,
    country: Option<&CountryCode>,
  ) -> Result<SettingsResponse, ApiError> {
    let endpoint = Endpoint::Settings {
      country: country.cloned(),
    };
    decode_json(&self.call(&endpoint).await?)
  }

  pub async fn defaults(&self) -> Result<SettingsResponse, ApiError> {
    decode_json(&self.call(&Endpoint::Defaults).await?)
  }

  pub async fn map(&self) -> Result<BTreeMap<String, SettingsResponse>, ApiError> {
    decode_json(&self.call(&Endpoint::Map).await?)
  }

  pub async fn builtin(&self) -> Result<BTreeMap<String, Vec<String>>, ApiError> {
    decode_json(&self.call(&Endpoint::Builtin).await?)
  }

  /// The built-in snapshot as sent by the service, for caching verbatim.
  pub async fn builtin_raw(&self) -> Result<Vec<u8>, ApiError> {
    self.call(&Endpoint::Builtin).await
  }

  pub async fn countries(&self) -> Result<Vec<String>, ApiError> {
    decode_json(&self.call(&Endpoint::Countries).await?)
  }

  async fn call(&self, endpoint: &Endpoint) -> Result<Vec<u8>, ApiError> {
    let mut request = self.build_request(endpoint)?;
    if let Some(auth) = &self.authenticator {
      auth.authenticate(&mut request);
    }

    tracing::debug!(endpoint = endpoint.path(), method = %request.method, "MOAT request");
    let response = self.transport.send(request).await.map_err(|e| {
      tracing::debug!(endpoint = endpoint.path(), error = %e, "MOAT request failed");
      ApiError::from(e)
    })?;
    check_response(response)
  }
}
