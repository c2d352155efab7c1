use crate::moat::{MoatTunnel, DEFAULT_TRANSPORTS, MOAT_BASE_URL};
use crate::on_demand::OnDemandConfig;
use crate::storage::atomic_write_file;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub moat: MoatConfig,
  pub registry: RegistryConfig,
  pub on_demand: Option<OnDemandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
  #[default]
  None,
  Meek,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoatConfig {
  #[serde(default = "default_moat_base_url")]
  pub base_url: String,

  #[serde(default = "default_moat_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_moat_transports")]
  pub transports: Vec<String>,

  #[serde(default)]
  pub tunnel: TunnelMode,

  #[serde(default)]
  pub tunnel_port: u16,

  /// Any proxy URL reqwest understands. Ignored while a tunnel is set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub proxy: Option<String>,
}

impl Default for MoatConfig {
  fn default() -> Self {
    Self {
      base_url: default_moat_base_url(),
      timeout_seconds: default_moat_timeout_seconds(),
      transports: default_moat_transports(),
      tunnel: TunnelMode::None,
      tunnel_port: 0,
      proxy: None,
    }
  }
}

impl MoatConfig {
  pub fn base_url(&self) -> anyhow::Result<Url> {
    Url::parse(&self.base_url)
      .map_err(|e| anyhow::anyhow!("invalid MOAT base URL {}: {e}", self.base_url))
  }

  pub fn proxy_url(&self) -> anyhow::Result<Option<Url>> {
    if self.tunnel == TunnelMode::Meek {
      return MoatTunnel::Meek.proxy_url(self.tunnel_port).map(Some);
    }
    self
      .proxy
      .as_deref()
      .map(|p| Url::parse(p).map_err(|e| anyhow::anyhow!("invalid proxy URL: {e}")))
      .transpose()
  }
}

fn default_moat_base_url() -> String {
  MOAT_BASE_URL.to_string()
}

fn default_moat_timeout_seconds() -> u64 {
  30
}

fn default_moat_transports() -> Vec<String> {
  DEFAULT_TRANSPORTS.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bundled_file: Option<PathBuf>,

  #[serde(default = "default_max_age_hours")]
  pub max_age_hours: u64,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      bundled_file: None,
      max_age_hours: default_max_age_hours(),
    }
  }
}

fn default_max_age_hours() -> u64 {
  24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub moat: Option<MoatConfig>,

  #[serde(default)]
  pub registry: Option<RegistryConfig>,

  #[serde(default)]
  pub on_demand: Option<OnDemandConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(m) = self.moat {
      cfg.moat = m;
    }
    if let Some(r) = self.registry {
      cfg.registry = r;
    }
    cfg.on_demand = self.on_demand;

    if let Some(reason) = validate_moat_config(&cfg.moat) {
      tracing::warn!(reason = %reason, "moat config invalid; using defaults");
      cfg.moat = MoatConfig::default();
    }
    if cfg.registry.max_age_hours == 0 {
      tracing::warn!("registry max_age_hours must be > 0; using default");
      cfg.registry.max_age_hours = default_max_age_hours();
    }
    if let Some(od) = &cfg.on_demand {
      if [&od.access_key, &od.secret_key, &od.region, &od.group_name]
        .iter()
        .any(|v| v.trim().is_empty())
      {
        tracing::warn!("on_demand config incomplete; on-demand bridges disabled");
        cfg.on_demand = None;
      }
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none() || self.moat.is_none() || self.registry.is_none()
  }
}

fn validate_moat_config(cfg: &MoatConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.transports.is_empty() {
    return Some("transports must not be empty".to_string());
  }
  let Ok(url) = Url::parse(&cfg.base_url) else {
    return Some(format!("invalid base_url: {}", cfg.base_url));
  };
  if url.scheme() != "https" {
    return Some(format!("base_url must use HTTPS: {}", cfg.base_url));
  }
  if cfg.tunnel == TunnelMode::Meek && cfg.tunnel_port == 0 {
    return Some("tunnel = \"meek\" needs tunnel_port".to_string());
  }
  if let Some(proxy) = &cfg.proxy {
    if Url::parse(proxy).is_err() {
      return Some(format!("invalid proxy URL: {proxy}"));
    }
  }
  None
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  if !path.exists() {
    let cfg = Config::default();
    write_config(path, &cfg)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let needs_upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if needs_upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", chrono::Utc::now().timestamp()));
        let _ = fs::copy(path, &backup);
        let _ = write_config(path, &cfg);
        eprintln!(
          "bridgeconf: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", chrono::Utc::now().timestamp()));
      let _ = fs::rename(path, &backup);
      write_config(path, &cfg)?;
      eprintln!(
        "bridgeconf: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

fn write_config(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  let file = ConfigFile {
    logging: Some(cfg.logging.clone()),
    moat: Some(cfg.moat.clone()),
    registry: Some(cfg.registry.clone()),
    on_demand: cfg.on_demand.clone(),
  };
  atomic_write_file(path, toml::to_string_pretty(&file)?.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::test_dir;

  fn backups(dir: &Path, prefix: &str) -> usize {
    fs::read_dir(dir)
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
      .count()
  }

  #[test]
  fn missing_file_writes_defaults() {
    let dir = test_dir("config-missing");
    let path = dir.join("config.toml");
    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.moat.base_url, MOAT_BASE_URL);
    assert_eq!(cfg.moat.transports, vec!["obfs4", "snowflake"]);
    assert!(cfg.on_demand.is_none());

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[moat]"));
    assert!(written.contains("[registry]"));
    let _ = fs::remove_dir_all(dir);
  }

  #[test]
  fn partial_file_is_upgraded_with_backup() {
    let dir = test_dir("config-partial");
    let path = dir.join("config.toml");
    fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.logging.retention_days, 14);
    assert_eq!(backups(&dir, "config.toml.bak-"), 1);
    assert!(fs::read_to_string(&path).unwrap().contains("[moat]"));
    let _ = fs::remove_dir_all(dir);
  }

  #[test]
  fn invalid_file_is_replaced() {
    let dir = test_dir("config-invalid");
    let path = dir.join("config.toml");
    fs::write(&path, "[moat\nbase_url = ").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.moat.timeout_seconds, 30);
    assert_eq!(backups(&dir, "config.toml.bad-"), 1);
    let _ = fs::remove_dir_all(dir);
  }

  #[test]
  fn invalid_values_are_normalized() {
    let file: ConfigFile = toml::from_str(
      r#"
[moat]
base_url = "http://bridges.example/moat"

[registry]
max_age_hours = 0

[on_demand]
access_key = "ak"
secret_key = ""
region = "us-east-1"
group_name = "g"
"#,
    )
    .unwrap();
    let cfg = file.normalize();
    assert_eq!(cfg.moat.base_url, MOAT_BASE_URL);
    assert_eq!(cfg.registry.max_age_hours, 24);
    assert!(cfg.on_demand.is_none());
  }

  #[test]
  fn meek_tunnel_builds_socks_proxy() {
    let moat = MoatConfig {
      tunnel: TunnelMode::Meek,
      tunnel_port: 41000,
      proxy: Some("http://ignored.example:8080".to_string()),
      ..MoatConfig::default()
    };
    let url = moat.proxy_url().unwrap().unwrap();
    assert_eq!(url.scheme(), "socks5h");
    assert_eq!(url.port(), Some(41000));

    let moat = MoatConfig {
      proxy: Some("socks5h://127.0.0.1:9050".to_string()),
      ..MoatConfig::default()
    };
    assert_eq!(moat.proxy_url().unwrap().unwrap().port(), Some(9050));
    assert!(MoatConfig::default().proxy_url().unwrap().is_none());
  }
}
