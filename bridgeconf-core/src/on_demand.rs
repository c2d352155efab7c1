use crate::bridge::BridgeLine;
use crate::clock::Clock;
use crate::error::ApiError;
use crate::http::{check_response, decode_json, HttpRequest, HttpTransport, RequestAuthenticator};
use crate::signing::{self, SigningContext};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const SERVICE: &str = "gamelift";
const TARGET: &str = "GameLift.ClaimGameServer";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const BRIDGE_PREFIX: &str = "Bridge ";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDemandConfig {
  pub access_key: String,
  pub secret_key: String,
  pub region: String,
  pub group_name: String,
}

impl fmt::Debug for OnDemandConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OnDemandConfig")
      .field("access_key", &self.access_key)
      .field("secret_key", &"<redacted>")
      .field("region", &self.region)
      .field("group_name", &self.group_name)
      .finish()
  }
}

#[derive(Serialize)]
struct ClaimGameServerRequest<'a> {
  #[serde(rename = "GameServerGroupName")]
  group_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaimGameServerResponse {
  #[serde(rename = "GameServer", default)]
  game_server: Option<GameServer>,
}

#[derive(Debug, Deserialize)]
struct GameServer {
  #[serde(rename = "GameServerId", default)]
  id: Option<String>,
  #[serde(rename = "GameServerData", default)]
  data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payload {
  #[serde(rename = "obfs4_bridgeline", default)]
  bridge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
  #[serde(rename = "__type")]
  kind: String,
  message: String,
}

pub struct OnDemand<T> {
  transport: T,
  clock: Arc<dyn Clock>,
  authenticator: Option<Arc<dyn RequestAuthenticator>>,
}

impl<T: HttpTransport> OnDemand<T> {
  pub fn new(transport: T, clock: Arc<dyn Clock>) -> Self {
    Self {
      transport,
      clock,
      authenticator: None,
    }
  }

  pub fn with_authenticator(mut self, authenticator: Arc<dyn RequestAuthenticator>) -> Self {
    self.authenticator = Some(authenticator);
    self
  }

  pub fn build_request(&self, config: &OnDemandConfig) -> Result<HttpRequest, ApiError> {
    let ctx = SigningContext::new(
      config.access_key.as_str(),
      config.secret_key.as_str(),
      &config.region,
      SERVICE,
      self.clock.as_ref(),
    );

    let url = Url::parse(&format!("https://{}.{}.amazonaws.com/", ctx.service, ctx.region))
      .map_err(|e| {
        ApiError::NoRequestPossible(format!("invalid region {:?}: {e}", config.region))
      })?;
    let host = url
      .host_str()
      .ok_or_else(|| ApiError::NoRequestPossible("endpoint has no host".to_string()))?
      .to_string();
    let body = serde_json::to_vec(&ClaimGameServerRequest {
      group_name: &config.group_name,
    })
    .map_err(|e| ApiError::NoRequestPossible(e.to_string()))?;

    let mut request = HttpRequest::new(Method::POST, url);
    request.set_header("Content-Type", CONTENT_TYPE);
    request.set_header("Host", host);
    request.set_header("X-Amz-Target", TARGET);
    request.set_header(signing::AMZ_DATE_HEADER, ctx.amz_date());
    request.body = Some(body);

    signing::sign(&ctx, &mut request)?;
    if let Some(auth) = &self.authenticator {
      auth.authenticate(&mut request);
    }
    Ok(request)
  }

  /// `Ok(None)` when a server was claimed but carried no usable bridge.
  pub async fn fetch(&self, config: &OnDemandConfig) -> Result<Option<BridgeLine>, ApiError> {
    let request = self.build_request(config)?;
    tracing::info!(
      region = %config.region,
      group = %config.group_name,
      "claiming on-demand bridge"
    );

    let response = self.transport.send(request).await?;
    if response.status != 200 {
      if let Ok(e) = serde_json::from_slice::<ProviderError>(&response.body) {
        tracing::warn!(
          status = response.status,
          kind = %e.kind,
          "on-demand provider refused claim"
        );
        return Err(ApiError::ProviderReported {
          kind: e.kind,
          message: e.message,
        });
      }
    }

    let body = check_response(response)?;
    let claim: ClaimGameServerResponse = decode_json(&body)?;
    let Some(server) = claim.game_server else {
      return Ok(None);
    };
    tracing::debug!(server = server.id.as_deref().unwrap_or("-"), "game server claimed");

    let bridge = server
      .data
      .and_then(|data| serde_json::from_str::<Payload>(&data).ok())
      .and_then(|p| p.bridge)
      .map(|b| match b.strip_prefix(BRIDGE_PREFIX) {
        Some(rest) => rest.to_string(),
        None => b,
      })
      .filter(|b| !b.trim().is_empty());

    Ok(bridge.map(BridgeLine::new))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::FixedClock;
  use crate::http::testing::{ok_json, ScriptedTransport};
  use crate::http::HttpResponse;
  use chrono::{TimeZone, Utc};

  fn config() -> OnDemandConfig {
    OnDemandConfig {
      access_key: "AKIDEXAMPLE".to_string(),
      secret_key: "secret".to_string(),
      region: "EU-Central-1".to_string(),
      group_name: "bridges".to_string(),
    }
  }

  fn provisioner(transport: Arc<ScriptedTransport>) -> OnDemand<Arc<ScriptedTransport>> {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    OnDemand::new(transport, Arc::new(FixedClock(ts)))
  }

  #[test]
  fn request_is_signed_gamelift_claim() {
    let od = provisioner(ScriptedTransport::new(vec![]));
    let req = od.build_request(&config()).unwrap();

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.url.as_str(), "https://gamelift.eu-central-1.amazonaws.com/");
    assert_eq!(req.header("host"), Some("gamelift.eu-central-1.amazonaws.com"));
    assert_eq!(req.header("x-amz-target"), Some("GameLift.ClaimGameServer"));
    assert_eq!(req.header("x-amz-date"), Some("20240301T080000Z"));
    assert_eq!(req.header("content-type"), Some("application/x-amz-json-1.1"));
    assert_eq!(req.body.as_deref(), Some(br#"{"GameServerGroupName":"bridges"}"#.as_slice()));

    let auth = req.header("authorization").unwrap();
    assert!(auth.starts_with(
      "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240301/eu-central-1/gamelift/aws4_request, \
       SignedHeaders=host;x-amz-date;x-amz-target, Signature="
    ));
  }

  #[tokio::test]
  async fn extracts_bridge_and_strips_prefix() {
    let body = r#"{"GameServer":{"GameServerId":"gs-1","GameServerData":"{\"obfs4_bridgeline\":\"Bridge obfs4 192.0.2.7:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C cert=x iat-mode=0\"}"}}"#;
    let od = provisioner(ScriptedTransport::new(vec![ok_json(body)]));
    let bridge = od.fetch(&config()).await.unwrap().unwrap();
    assert_eq!(bridge.transport(), Some("obfs4"));
    assert_eq!(bridge.port(), Some(443));
    assert!(!bridge.raw().starts_with("Bridge"));
  }

  #[tokio::test]
  async fn missing_or_unreadable_payload_is_none() {
    let od = provisioner(ScriptedTransport::new(vec![
      ok_json(r#"{"GameServer":{"GameServerId":"gs-1"}}"#),
      ok_json(r#"{"GameServer":{"GameServerData":"not json"}}"#),
      ok_json(r#"{}"#),
    ]));
    assert!(od.fetch(&config()).await.unwrap().is_none());
    assert!(od.fetch(&config()).await.unwrap().is_none());
    assert!(od.fetch(&config()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn provider_error_is_surfaced() {
    let od = provisioner(ScriptedTransport::new(vec![
      Ok(HttpResponse::new(
        400,
        br#"{"__type":"OutOfCapacityException","message":"no servers available"}"#.to_vec(),
      )),
      Ok(HttpResponse::new(500, b"oops".to_vec())),
    ]));

    let err = od.fetch(&config()).await.unwrap_err();
    assert_eq!(err.to_string(), "OutOfCapacityException: no servers available");
    assert!(matches!(
      od.fetch(&config()).await.unwrap_err(),
      ApiError::UnexpectedStatus { code: 500, .. }
    ));
  }

  #[test]
  fn debug_hides_secret() {
    assert!(!format!("{:?}", config()).contains("secret\""));
  }
}
