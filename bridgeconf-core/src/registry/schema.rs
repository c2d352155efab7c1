use crate::bridge::BridgeLine;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Named lists of the built-in snapshot. The serialized key of each kind is
/// part of the on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BridgeKind {
  Meek,
  Obfs4,
  Snowflake,
  Webtunnel,
}

impl BridgeKind {
  pub const ALL: [BridgeKind; 4] = [
    BridgeKind::Meek,
    BridgeKind::Obfs4,
    BridgeKind::Snowflake,
    BridgeKind::Webtunnel,
  ];

  pub fn key(self) -> &'static str {
    match self {
      BridgeKind::Meek => "meek",
      BridgeKind::Obfs4 => "obfs4",
      BridgeKind::Snowflake => "snowflake",
      BridgeKind::Webtunnel => "webtunnel",
    }
  }

}

impl fmt::Display for BridgeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

/// The persisted snapshot. Missing or `null` lists decode as empty and
/// unknown keys are ignored, so older and newer snapshots stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltInBridges {
  #[serde(default, deserialize_with = "null_as_empty")]
  pub meek: Vec<BridgeLine>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub obfs4: Vec<BridgeLine>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub snowflake: Vec<BridgeLine>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub webtunnel: Vec<BridgeLine>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<BridgeLine>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<Vec<BridgeLine>>::deserialize(deserializer)?.unwrap_or_default())
}

impl BuiltInBridges {
  pub fn get(&self, kind: BridgeKind) -> &[BridgeLine] {
    match kind {
      BridgeKind::Meek => &self.meek,
      BridgeKind::Obfs4 => &self.obfs4,
      BridgeKind::Snowflake => &self.snowflake,
      BridgeKind::Webtunnel => &self.webtunnel,
    }
  }

  pub fn set(&mut self, kind: BridgeKind, lines: Vec<BridgeLine>) {
    match kind {
      BridgeKind::Meek => self.meek = lines,
      BridgeKind::Obfs4 => self.obfs4 = lines,
      BridgeKind::Snowflake => self.snowflake = lines,
      BridgeKind::Webtunnel => self.webtunnel = lines,
    }
  }

  pub fn is_empty(&self) -> bool {
    BridgeKind::ALL.into_iter().all(|k| self.get(k).is_empty())
  }

  pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
    Ok(serde_json::from_slice(bytes)?)
  }

  pub fn to_vec(&self) -> anyhow::Result<Vec<u8>> {
    let mut out = serde_json::to_vec_pretty(self)?;
    out.push(b'\n');
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_and_unknown_keys_are_tolerated() {
    let raw = br#"{"obfs4": ["obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C"], "conjure": ["x"]}"#;
    let snap = BuiltInBridges::from_slice(raw).unwrap();
    assert_eq!(snap.obfs4.len(), 1);
    assert!(snap.meek.is_empty());
    assert!(snap.snowflake.is_empty());
    assert!(snap.webtunnel.is_empty());
  }

  #[test]
  fn null_lists_decode_as_empty() {
    let raw = br#"{"meek": null, "obfs4": ["obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C"], "webtunnel": null}"#;
    let snap = BuiltInBridges::from_slice(raw).unwrap();
    assert!(snap.meek.is_empty());
    assert!(snap.webtunnel.is_empty());
    assert_eq!(snap.get(BridgeKind::Obfs4).len(), 1);
  }

  #[test]
  fn keys_are_stable() {
    let snap = BuiltInBridges::default();
    let v: serde_json::Value = serde_json::from_slice(&snap.to_vec().unwrap()).unwrap();
    for kind in BridgeKind::ALL {
      assert!(v.get(kind.key()).is_some(), "missing key {kind}");
    }
  }
}
