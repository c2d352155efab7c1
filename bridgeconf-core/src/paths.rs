use std::path::{Path, PathBuf};

const APP_DIR: &str = "bridgeconf";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Some(home) = non_empty_var("BRIDGECONF_HOME") {
    return Ok(PathBuf::from(home));
  }
  if let Some(data) = non_empty_var("XDG_DATA_HOME") {
    return Ok(PathBuf::from(data).join(APP_DIR));
  }
  let home = non_empty_var("HOME")
    .ok_or_else(|| anyhow::anyhow!("cannot locate data directory: HOME is not set"))?;
  Ok(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn updated_bridges_path(base: &Path) -> PathBuf {
  base.join("updated-bridges.json")
}

pub fn bundled_bridges_path(base: &Path) -> PathBuf {
  base.join("builtin-bridges.json")
}

pub fn settings_path(base: &Path) -> PathBuf {
  base.join("settings.toml")
}
