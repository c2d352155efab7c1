use crate::autoconf::Decision;
use crate::storage::atomic_write_file;
use crate::transport::Transport;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
  pub transport: Transport,
  pub custom_bridges: Vec<String>,
  pub on_demand_bridges: Vec<String>,
}

impl StoredSettings {
  /// Takes bridge lines as typed or pasted by the user. Blank lines and
  /// lines starting with `//` or `#` are dropped.
  pub fn apply_custom_bridges_text(&mut self, text: &str) {
    self.custom_bridges = text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with("//") && !l.starts_with('#'))
      .map(str::to_string)
      .collect();

    if !self.custom_bridges.is_empty() {
      self.transport = Transport::Custom;
    } else if self.transport == Transport::Custom {
      self.transport = Transport::None;
    }
  }

  pub fn apply_decision(&mut self, decision: &Decision) {
    self.transport = decision.transport;
    if !decision.custom_bridges.is_empty() {
      self.custom_bridges = decision.custom_bridges.clone();
    }
  }
}

pub trait SettingsStore {
  fn load(&self) -> anyhow::Result<StoredSettings>;
  fn save(&self, settings: &StoredSettings) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
  path: PathBuf,
}

impl FileSettingsStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl SettingsStore for FileSettingsStore {
  fn load(&self) -> anyhow::Result<StoredSettings> {
    let text = match fs::read_to_string(&self.path) {
      Ok(t) => t,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoredSettings::default()),
      Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
    };

    match toml::from_str(&text) {
      Ok(s) => Ok(s),
      Err(e) => {
        tracing::warn!(path = %self.path.display(), error = %e, "settings invalid; using defaults");
        Ok(StoredSettings::default())
      }
    }
  }

  fn save(&self, settings: &StoredSettings) -> anyhow::Result<()> {
    let text = toml::to_string_pretty(settings).context("serialize settings")?;
    atomic_write_file(&self.path, text.as_bytes())?;
    tracing::debug!(path = %self.path.display(), transport = %settings.transport, "settings saved");
    Ok(())
  }
}
