use crate::bridge::BridgeLine;
use crate::country::CountryCode;
use crate::error::ApiError;
use crate::http::HttpTransport;
use crate::moat::{MoatClient, Setting, TransportKind};
use crate::registry::{BridgeKind, BridgeRegistry};
use crate::transport::Transport;
use serde::Serialize;

const NO_DATA_CODES: [i64; 2] = [404, 406];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Decision {
  pub transport: Transport,
  pub custom_bridges: Vec<String>,
}

pub struct AutoConf<T> {
  client: MoatClient<T>,
  registry: BridgeRegistry,
}

impl<T: HttpTransport> AutoConf<T> {
  pub fn new(client: MoatClient<T>, registry: BridgeRegistry) -> Self {
    Self { client, registry }
  }

  pub fn registry(&self) -> &BridgeRegistry {
    &self.registry
  }

  pub async fn refresh_builtin(&mut self) {
    if !self.registry.is_stale() {
      return;
    }
    match self.client.builtin_raw().await {
      Ok(bytes) => {
        if let Err(e) = self.registry.install_snapshot(&bytes) {
          tracing::warn!(error = %format!("{e:#}"), "ignoring built-in bridge update");
        }
      }
      Err(e) => tracing::warn!(error = %e, "built-in bridge refresh failed"),
    }
  }

  /// With `cannot_connect_without_pt` set, an empty answer for the location
  /// is not taken as "no bridges needed" and the global defaults are asked
  /// instead.
  pub async fn negotiate(
    &mut self,
    country: Option<&CountryCode>,
    cannot_connect_without_pt: bool,
  ) -> Result<Decision, ApiError> {
    self.refresh_builtin().await;

    let mut force = cannot_connect_without_pt;
    let settings = match self.client.settings(country).await {
      Ok(resp) => resp.settings.unwrap_or_default(),
      Err(e) if e.server_code().is_some_and(|c| NO_DATA_CODES.contains(&c)) => {
        tracing::info!(
          country = ?country.map(CountryCode::as_str),
          error = %e,
          "no settings for location, using defaults"
        );
        force = true;
        Vec::new()
      }
      Err(e) => return Err(e),
    };

    if settings.is_empty() && !force {
      tracing::info!("no bridges needed");
      return Ok(Decision::default());
    }

    if let Some(decision) = extract(&settings, &mut self.registry) {
      tracing::info!(
        transport = %decision.transport,
        custom = decision.custom_bridges.len(),
        "negotiated"
      );
      return Ok(decision);
    }

    let defaults = self.client.defaults().await?;
    let decision =
      extract(defaults.settings(), &mut self.registry).ok_or(ApiError::NotUnderstandable)?;
    tracing::info!(
      transport = %decision.transport,
      custom = decision.custom_bridges.len(),
      "negotiated from defaults"
    );
    Ok(decision)
  }
}

/// Walks `settings` in server order. The first actionable entry picks the
/// transport; later entries still feed built-in list updates and custom
/// lines. Registry updates stick even when no decision results.
pub fn extract(settings: &[Setting], registry: &mut BridgeRegistry) -> Option<Decision> {
  let mut transport: Option<Transport> = None;
  let mut custom = Vec::new();

  for setting in settings {
    let lines = &setting.bridge_lines;
    match (&setting.kind, setting.is_builtin()) {
      (TransportKind::Snowflake, _) => {
        update_builtin(registry, BridgeKind::Snowflake, lines);
        transport.get_or_insert(Transport::Snowflake);
      }
      (TransportKind::Obfs4, true) => {
        update_builtin(registry, BridgeKind::Obfs4, lines);
        transport.get_or_insert(Transport::Obfs4);
      }
      (TransportKind::Webtunnel, true) => {
        update_builtin(registry, BridgeKind::Webtunnel, lines);
        custom.extend(lines.iter().cloned());
        transport.get_or_insert(Transport::Custom);
      }
      (TransportKind::Obfs4 | TransportKind::Webtunnel, false) => {
        if lines.is_empty() {
          continue;
        }
        custom.extend(lines.iter().cloned());
        transport.get_or_insert(Transport::Custom);
      }
      (TransportKind::Other(kind), _) => {
        tracing::debug!(kind = %kind, "skipping unsupported transport");
      }
    }
  }

  transport.map(|transport| Decision {
    transport,
    custom_bridges: custom,
  })
}

fn update_builtin(registry: &mut BridgeRegistry, kind: BridgeKind, lines: &[String]) {
  if lines.is_empty() {
    return;
  }
  let lines = lines.iter().map(|l| BridgeLine::parse(l)).collect();
  if let Err(e) = registry.replace(kind, lines) {
    tracing::warn!(kind = %kind, error = %format!("{e:#}"), "could not store built-in bridges");
  }
}
