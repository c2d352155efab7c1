use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport named by a setting. Kinds this client cannot act on are kept
/// verbatim so they can be logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportKind {
  Snowflake,
  Obfs4,
  Webtunnel,
  Other(String),
}

impl TransportKind {
  pub fn as_str(&self) -> &str {
    match self {
      TransportKind::Snowflake => "snowflake",
      TransportKind::Obfs4 => "obfs4",
      TransportKind::Webtunnel => "webtunnel",
      TransportKind::Other(s) => s,
    }
  }
}

impl From<String> for TransportKind {
  fn from(value: String) -> Self {
    match value.as_str() {
      "snowflake" => TransportKind::Snowflake,
      "obfs4" => TransportKind::Obfs4,
      "webtunnel" => TransportKind::Webtunnel,
      _ => TransportKind::Other(value),
    }
  }
}

impl From<&str> for TransportKind {
  fn from(value: &str) -> Self {
    value.to_string().into()
  }
}

impl From<TransportKind> for String {
  fn from(value: TransportKind) -> Self {
    match value {
      TransportKind::Other(s) => s,
      k => k.as_str().to_string(),
    }
  }
}

impl fmt::Display for TransportKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BridgeSource {
  Builtin,
  BridgeDb,
  Other(String),
}

impl From<String> for BridgeSource {
  fn from(value: String) -> Self {
    match value.as_str() {
      "builtin" => BridgeSource::Builtin,
      "bridgedb" => BridgeSource::BridgeDb,
      _ => BridgeSource::Other(value),
    }
  }
}

impl From<BridgeSource> for String {
  fn from(value: BridgeSource) -> Self {
    match value {
      BridgeSource::Builtin => "builtin".to_string(),
      BridgeSource::BridgeDb => "bridgedb".to_string(),
      BridgeSource::Other(s) => s,
    }
  }
}

/// One recommendation. Position in the response is its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SettingWire", into = "SettingWire")]
pub struct Setting {
  pub kind: TransportKind,
  pub source: BridgeSource,
  pub bridge_lines: Vec<String>,
}

impl Setting {
  pub fn new(
    kind: impl Into<TransportKind>,
    source: BridgeSource,
    bridge_lines: Vec<String>,
  ) -> Self {
    Self {
      kind: kind.into(),
      source,
      bridge_lines,
    }
  }

  pub fn is_builtin(&self) -> bool {
    self.source == BridgeSource::Builtin
  }
}

#[derive(Serialize, Deserialize)]
struct SettingWire {
  bridges: BridgesWire,
}

#[derive(Serialize, Deserialize)]
struct BridgesWire {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  bridge_strings: Option<Vec<String>>,
}

impl From<SettingWire> for Setting {
  fn from(wire: SettingWire) -> Self {
    Self {
      kind: wire.bridges.kind.into(),
      source: wire.bridges.source.into(),
      bridge_lines: wire.bridges.bridge_strings.unwrap_or_default(),
    }
  }
}

impl From<Setting> for SettingWire {
  fn from(s: Setting) -> Self {
    Self {
      bridges: BridgesWire {
        kind: s.kind.into(),
        source: s.source.into(),
        bridge_strings: Some(s.bridge_lines),
      },
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsResponse {
  #[serde(default)]
  pub settings: Option<Vec<Setting>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub country: Option<String>,
}

impl SettingsResponse {
  pub fn settings(&self) -> &[Setting] {
    self.settings.as_deref().unwrap_or_default()
  }

  pub fn has_settings(&self) -> bool {
    !self.settings().is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsRequest {
  pub country: Option<String>,
  pub transports: Vec<String>,
}
