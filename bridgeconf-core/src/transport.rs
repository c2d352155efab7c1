use crate::bridge::{BridgeLine, Descriptor};
use crate::registry::{BridgeKind, BridgeRegistry};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const SNOWFLAKE_EXTRA_FRONTS: [&str; 1] = ["github.githubassets.com"];
const AMP_BROKER: &str = "https://snowflake-broker.torproject.net/";
const AMP_FRONTS: [&str; 1] = ["www.google.com"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
  #[default]
  None,
  Obfs4,
  Snowflake,
  SnowflakeAmp,
  Meek,
  Dnstt,
  Custom,
  OnDemand,
}

impl Transport {
  pub const ALL: [Transport; 8] = [
    Transport::None,
    Transport::Obfs4,
    Transport::Snowflake,
    Transport::SnowflakeAmp,
    Transport::Meek,
    Transport::Dnstt,
    Transport::Custom,
    Transport::OnDemand,
  ];

  pub fn key(self) -> &'static str {
    match self {
      Transport::None => "none",
      Transport::Obfs4 => "obfs4",
      Transport::Snowflake => "snowflake",
      Transport::SnowflakeAmp => "snowflake-amp",
      Transport::Meek => "meek",
      Transport::Dnstt => "dnstt",
      Transport::Custom => "custom",
      Transport::OnDemand => "on-demand",
    }
  }

  pub fn description(self) -> &'static str {
    match self {
      Transport::None => "",
      Transport::Obfs4 => "Obfs4 bridges",
      Transport::Snowflake => "Snowflake bridges",
      Transport::SnowflakeAmp => "Snowflake bridges (AMP rendezvous)",
      Transport::Meek => "Meek bridge",
      Transport::Dnstt => "DNSTT bridge",
      Transport::Custom => "custom bridges",
      Transport::OnDemand => "On-demand bridges",
    }
  }

  /// `custom` and `on_demand` hold the user's own lines. When the list a
  /// transport depends on is empty, custom and on-demand fall back to the
  /// built-in obfs4 bridges.
  pub fn bridge_lines(
    self,
    registry: &BridgeRegistry,
    custom: &[String],
    on_demand: &[String],
  ) -> Vec<BridgeLine> {
    match self {
      Transport::None | Transport::Dnstt => Vec::new(),
      Transport::OnDemand if !on_demand.is_empty() => {
        on_demand.iter().map(|l| BridgeLine::parse(l)).collect()
      }
      Transport::Custom if !custom.is_empty() => {
        custom.iter().map(|l| BridgeLine::parse(l)).collect()
      }
      Transport::Obfs4 | Transport::Custom | Transport::OnDemand => {
        registry.get(BridgeKind::Obfs4).to_vec()
      }
      Transport::Snowflake => registry
        .get(BridgeKind::Snowflake)
        .iter()
        .filter_map(Descriptor::from_line)
        .map(|mut d| {
          d.fronts.extend(SNOWFLAKE_EXTRA_FRONTS.iter().map(|f| f.to_string()));
          d.build()
        })
        .collect(),
      Transport::SnowflakeAmp => registry
        .get(BridgeKind::Snowflake)
        .iter()
        .filter_map(Descriptor::from_line)
        .enumerate()
        .map(|(idx, mut d)| {
          d.host = format!("192.0.2.{}", 5 + idx);
          d.url = Url::parse(AMP_BROKER).ok();
          d.fronts = AMP_FRONTS.iter().map(|f| f.to_string()).collect();
          d.build()
        })
        .collect(),
      Transport::Meek => registry.get(BridgeKind::Meek).to_vec(),
    }
  }

  pub fn plugins(self, custom: &[String]) -> BTreeSet<String> {
    let fixed: &[&str] = match self {
      Transport::None => &[],
      Transport::Obfs4 | Transport::OnDemand => &["obfs4"],
      Transport::Snowflake | Transport::SnowflakeAmp => &["snowflake"],
      Transport::Meek => &["meek_lite"],
      Transport::Dnstt => &["dnstt"],
      Transport::Custom => {
        return custom
          .iter()
          .filter_map(|raw| BridgeLine::parse(raw).transport().map(str::to_string))
          .collect()
      }
    };
    fixed.iter().map(|s| s.to_string()).collect()
  }
}

impl fmt::Display for Transport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for Transport {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|t| t.key() == s.trim())
      .ok_or_else(|| anyhow::anyhow!("unknown transport {s:?}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::SystemClock;
  use crate::registry::RegistryFiles;
  use crate::storage::test_dir;
  use std::sync::Arc;

  const SNOWFLAKE: &str = "snowflake 192.0.2.3:80 2B280B23E1107BB62ABFC40DDCC8824814F80A72 fingerprint=2B280B23E1107BB62ABFC40DDCC8824814F80A72 url=https://snowflake-broker.example/ fronts=foursquare.com,www.shazam.com ice=stun:stun.example:3478 utls-imitate=hellorandomizedalpn";

  fn registry() -> (BridgeRegistry, std::path::PathBuf) {
    let dir = test_dir("transport");
    let mut reg = BridgeRegistry::load(
      RegistryFiles {
        update_file: Some(dir.join("updated-bridges.json")),
        bundled_file: None,
      },
      Arc::new(SystemClock),
    );
    reg
      .replace(BridgeKind::Snowflake, vec![BridgeLine::new(SNOWFLAKE), BridgeLine::new(SNOWFLAKE)])
      .unwrap();
    reg
      .replace(
        BridgeKind::Obfs4,
        vec![BridgeLine::new("obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C cert=x iat-mode=0")],
      )
      .unwrap();
    reg
      .replace(
        BridgeKind::Meek,
        vec![BridgeLine::new("meek_lite 192.0.2.20:80 url=https://example.org front=www.example.net")],
      )
      .unwrap();
    (reg, dir)
  }

  #[test]
  fn snowflake_gains_extra_front() {
    let (reg, dir) = registry();
    let lines = Transport::Snowflake.bridge_lines(&reg, &[], &[]);
    assert_eq!(lines.len(), 2);
    let fronts = lines[0].fronts();
    assert!(fronts.contains("github.githubassets.com"));
    assert!(fronts.contains("foursquare.com"));
    assert_eq!(lines[0].ice(), Some("stun:stun.example:3478"));
    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn snowflake_amp_rewrites_address_broker_and_fronts() {
    let (reg, dir) = registry();
    let lines = Transport::SnowflakeAmp.bridge_lines(&reg, &[], &[]);
    assert_eq!(lines[0].host().as_deref(), Some("192.0.2.5"));
    assert_eq!(lines[1].host().as_deref(), Some("192.0.2.6"));
    assert_eq!(lines[0].port(), Some(80));
    assert_eq!(lines[0].url_str(), Some(AMP_BROKER));
    assert_eq!(lines[0].fronts().into_iter().collect::<Vec<_>>(), vec!["www.google.com"]);
    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn custom_and_on_demand_fall_back_to_obfs4() {
    let (reg, dir) = registry();
    let custom = vec!["webtunnel [2001:db8::1]:443 url=https://w.example/x".to_string()];

    let lines = Transport::Custom.bridge_lines(&reg, &custom, &[]);
    assert_eq!(lines[0].transport(), Some("webtunnel"));
    assert_eq!(Transport::Custom.bridge_lines(&reg, &[], &[])[0].transport(), Some("obfs4"));
    assert_eq!(Transport::OnDemand.bridge_lines(&reg, &custom, &[])[0].transport(), Some("obfs4"));
    assert_eq!(Transport::Meek.bridge_lines(&reg, &[], &[]).len(), 1);
    assert!(Transport::None.bridge_lines(&reg, &custom, &custom).is_empty());
    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn plugins_for_custom_follow_the_lines() {
    let custom = vec![
      "obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C".to_string(),
      "webtunnel [2001:db8::1]:443 url=https://w.example/x".to_string(),
      "192.0.2.9:9001".to_string(),
    ];
    let plugins: Vec<_> = Transport::Custom.plugins(&custom).into_iter().collect();
    assert_eq!(plugins, vec!["obfs4", "webtunnel"]);
    assert_eq!(Transport::SnowflakeAmp.plugins(&[]).len(), 1);
  }

  #[test]
  fn keys_parse_back() {
    for t in Transport::ALL {
      assert_eq!(t.key().parse::<Transport>().unwrap(), t);
      assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t.key()));
    }
    assert!("carrier-pigeon".parse::<Transport>().is_err());
  }
}
