use crate::bridge::BridgeLine;
use crate::clock::Clock;
use crate::storage::atomic_write_file;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod legacy;
pub mod schema;

pub use legacy::import_legacy_plist;
pub use schema::{BridgeKind, BuiltInBridges};

#[derive(Debug, Clone, Default)]
pub struct RegistryFiles {
  pub update_file: Option<PathBuf>,
  pub bundled_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
  Update,
  Bundled,
  Empty,
}

/// Built-in bridges per kind. Lists are replaced wholesale, never merged.
pub struct BridgeRegistry {
  files: RegistryFiles,
  clock: Arc<dyn Clock>,
  max_age: Duration,
  bridges: BuiltInBridges,
  source: SnapshotSource,
}

impl BridgeRegistry {
  pub fn load(files: RegistryFiles, clock: Arc<dyn Clock>) -> Self {
    let (bridges, source) = read_snapshot(&files);
    tracing::debug!(
      source = ?source,
      meek = bridges.meek.len(),
      obfs4 = bridges.obfs4.len(),
      snowflake = bridges.snowflake.len(),
      webtunnel = bridges.webtunnel.len(),
      "built-in bridges loaded"
    );
    Self {
      files,
      clock,
      max_age: Duration::days(1),
      bridges,
      source,
    }
  }

  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn get(&self, kind: BridgeKind) -> &[BridgeLine] {
    self.bridges.get(kind)
  }

  pub fn snapshot(&self) -> &BuiltInBridges {
    &self.bridges
  }

  pub fn source(&self) -> SnapshotSource {
    self.source
  }

  pub fn last_updated(&self) -> Option<DateTime<Utc>> {
    let path = self.files.update_file.as_ref()?;
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
  }

  pub fn is_stale(&self) -> bool {
    match self.last_updated() {
      Some(modified) => self.clock.now().signed_duration_since(modified) > self.max_age,
      None => true,
    }
  }

  pub fn replace(&mut self, kind: BridgeKind, lines: Vec<BridgeLine>) -> anyhow::Result<()> {
    tracing::info!(kind = %kind, count = lines.len(), "replacing built-in bridge list");
    self.bridges.set(kind, lines);
    self.persist()
  }

  /// Installs a snapshot exactly as the service returned it. Bytes that do
  /// not decode are rejected before anything is written.
  pub fn install_snapshot(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
    if bytes.is_empty() {
      anyhow::bail!("empty built-in bridge snapshot");
    }
    let bridges = BuiltInBridges::from_slice(bytes).context("decode built-in bridge snapshot")?;
    let path = self.update_file()?.to_path_buf();
    atomic_write_file(&path, bytes)?;
    self.bridges = bridges;
    self.source = SnapshotSource::Update;
    tracing::info!(path = %path.display(), "built-in bridge snapshot updated");
    Ok(())
  }

  fn persist(&mut self) -> anyhow::Result<()> {
    let bytes = self.bridges.to_vec()?;
    let path = self.update_file()?;
    atomic_write_file(path, &bytes)?;
    self.source = SnapshotSource::Update;
    Ok(())
  }

  fn update_file(&self) -> anyhow::Result<&Path> {
    self
      .files
      .update_file
      .as_deref()
      .ok_or_else(|| anyhow::anyhow!("no cache location to store built-in bridges"))
  }
}

fn read_snapshot(files: &RegistryFiles) -> (BuiltInBridges, SnapshotSource) {
  if let Some(bridges) = files.update_file.as_deref().and_then(read_file) {
    return (bridges, SnapshotSource::Update);
  }
  if let Some(bridges) = files.bundled_file.as_deref().and_then(read_file) {
    return (bridges, SnapshotSource::Bundled);
  }
  (BuiltInBridges::default(), SnapshotSource::Empty)
}

fn read_file(path: &Path) -> Option<BuiltInBridges> {
  let bytes = fs::read(path).ok()?;
  match BuiltInBridges::from_slice(&bytes) {
    Ok(b) => Some(b),
    Err(e) => {
      tracing::warn!(path = %path.display(), error = %e, "ignoring undecodable bridge snapshot");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{FixedClock, SystemClock};
  use crate::storage::test_dir;

  const BUNDLED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/builtin-bridges.json");

  fn files(dir: &Path) -> RegistryFiles {
    RegistryFiles {
      update_file: Some(dir.join("updated-bridges.json")),
      bundled_file: Some(PathBuf::from(BUNDLED)),
    }
  }

  fn line(raw: &str) -> BridgeLine {
    BridgeLine::new(raw)
  }

  #[test]
  fn falls_back_to_bundled_then_empty() {
    let dir = test_dir("registry-fallback");
    let reg = BridgeRegistry::load(files(&dir), Arc::new(SystemClock));
    assert_eq!(reg.source(), SnapshotSource::Bundled);
    assert!(!reg.get(BridgeKind::Obfs4).is_empty());
    assert!(!reg.get(BridgeKind::Snowflake).is_empty());

    let none = RegistryFiles {
      update_file: Some(dir.join("missing.json")),
      bundled_file: Some(dir.join("also-missing.json")),
    };
    let reg = BridgeRegistry::load(none, Arc::new(SystemClock));
    assert_eq!(reg.source(), SnapshotSource::Empty);
    assert!(reg.snapshot().is_empty());

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn corrupt_update_file_falls_back_to_bundled() {
    let dir = test_dir("registry-corrupt");
    let f = files(&dir);
    fs::write(f.update_file.as_ref().unwrap(), b"{ not json").unwrap();

    let reg = BridgeRegistry::load(f, Arc::new(SystemClock));
    assert_eq!(reg.source(), SnapshotSource::Bundled);

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn replace_persists_and_is_byte_stable() {
    let dir = test_dir("registry-replace");
    let f = files(&dir);
    let update = f.update_file.clone().unwrap();
    let mut reg = BridgeRegistry::load(f.clone(), Arc::new(SystemClock));

    let lines = vec![
      line("snowflake 192.0.2.3:80 2B280B23E1107BB62ABFC40DDCC8824814F80A72 url=https://a.example/"),
      line("snowflake 192.0.2.4:80 8838024498816A039FCBBAB14E6F40A0843051FA url=https://b.example/"),
    ];
    reg.replace(BridgeKind::Snowflake, lines.clone()).unwrap();
    let first = fs::read(&update).unwrap();

    reg.replace(BridgeKind::Snowflake, lines.clone()).unwrap();
    let second = fs::read(&update).unwrap();
    assert_eq!(first, second);

    let reloaded = BridgeRegistry::load(f, Arc::new(SystemClock));
    assert_eq!(reloaded.source(), SnapshotSource::Update);
    assert_eq!(reloaded.get(BridgeKind::Snowflake), lines.as_slice());
    // Other lists were carried over from the bundled snapshot.
    assert_eq!(reloaded.get(BridgeKind::Obfs4), reg.get(BridgeKind::Obfs4));

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn staleness_follows_update_file_age() {
    let dir = test_dir("registry-stale");
    let f = files(&dir);

    let reg = BridgeRegistry::load(f.clone(), Arc::new(SystemClock));
    assert!(reg.is_stale(), "never fetched must be stale");

    let mut reg = reg;
    reg.replace(BridgeKind::Meek, vec![]).unwrap();
    assert!(!reg.is_stale());

    let modified = reg.last_updated().unwrap();
    let clock = Arc::new(FixedClock(modified + Duration::hours(23)));
    let later = BridgeRegistry::load(f.clone(), clock);
    assert!(!later.is_stale());

    let much_later = BridgeRegistry::load(f, Arc::new(FixedClock(modified + Duration::days(2))));
    assert!(much_later.is_stale());

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn install_snapshot_writes_verbatim_and_rejects_garbage() {
    let dir = test_dir("registry-install");
    let f = files(&dir);
    let update = f.update_file.clone().unwrap();
    let mut reg = BridgeRegistry::load(f, Arc::new(SystemClock));

    let bytes = br#"{"meek":["meek_lite 192.0.2.20:80 url=https://example.org front=www.example.net"],"obfs4":[],"snowflake":[],"webtunnel":[]}"#;
    reg.install_snapshot(bytes).unwrap();
    assert_eq!(fs::read(&update).unwrap(), bytes.to_vec());
    assert_eq!(reg.get(BridgeKind::Meek).len(), 1);
    assert!(reg.get(BridgeKind::Obfs4).is_empty());

    assert!(reg.install_snapshot(b"<html>blocked</html>").is_err());
    assert!(reg.install_snapshot(b"").is_err());
    assert_eq!(fs::read(&update).unwrap(), bytes.to_vec());
    assert_eq!(reg.get(BridgeKind::Meek).len(), 1);

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn install_snapshot_accepts_null_lists() {
    let dir = test_dir("registry-install-null");
    let mut reg = BridgeRegistry::load(files(&dir), Arc::new(SystemClock));

    let bytes = br#"{"meek":null,"obfs4":["obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C"],"snowflake":null}"#;
    reg.install_snapshot(bytes).unwrap();
    assert_eq!(reg.source(), SnapshotSource::Update);
    assert_eq!(reg.get(BridgeKind::Obfs4).len(), 1);
    assert!(reg.get(BridgeKind::Meek).is_empty());

    let reloaded = BridgeRegistry::load(files(&dir), Arc::new(SystemClock));
    assert_eq!(reloaded.source(), SnapshotSource::Update);
    assert!(reloaded.get(BridgeKind::Snowflake).is_empty());

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn replace_without_cache_location_fails_softly() {
    let mut reg = BridgeRegistry::load(RegistryFiles::default(), Arc::new(SystemClock));
    assert!(reg.replace(BridgeKind::Obfs4, vec![]).is_err());
    assert!(reg.is_stale());
  }
}
