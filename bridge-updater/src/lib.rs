use anyhow::Context;
use bridgeconf_core::bridge::BridgeLine;
use bridgeconf_core::http::{HttpRequest, HttpTransport, ReqwestTransport, TransportOptions};
use bridgeconf_core::registry::{import_legacy_plist, BridgeKind, BuiltInBridges};
use bridgeconf_core::storage::atomic_write_file;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_LIST_URL: &str =
  "https://gitweb.torproject.org/builders/tor-browser-build.git/plain/projects/common/bridges_list.obfs4.txt";

const MIN_UPDATE_INTERVAL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSource {
  Url(String),
  File(PathBuf),
  Plist(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
  pub source: ListSource,
  pub output: PathBuf,
  pub force: bool,
}

impl UpdateConfig {
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    let mut source = ListSource::Url(DEFAULT_LIST_URL.to_string());
    let mut output: Option<PathBuf> = None;
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
      match args[i].as_str() {
        "--url" => {
          source = ListSource::Url(value_after(args, i)?.to_string());
          i += 2;
        }
        "--input" => {
          source = ListSource::File(PathBuf::from(value_after(args, i)?));
          i += 2;
        }
        "--plist" => {
          source = ListSource::Plist(PathBuf::from(value_after(args, i)?));
          i += 2;
        }
        "--output" => {
          output = Some(PathBuf::from(value_after(args, i)?));
          i += 2;
        }
        "--force" => {
          force = true;
          i += 1;
        }
        other => anyhow::bail!("unknown argument `{other}`"),
      }
    }

    let output = match output {
      Some(p) => p,
      None => bridgeconf_core::paths::bundled_bridges_path(&bridgeconf_core::paths::base_dir()?),
    };

    Ok(Self { source, output, force })
  }
}

fn value_after<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
  args
    .get(i + 1)
    .map(|s| s.as_str())
    .filter(|v| !v.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("`{}` expects a value", args[i]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Fresh,
  Unchanged { count: usize },
  Written { count: usize },
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Fresh => {
        f.write_str("Snapshot is less than a day old; nothing to do (use --force).")
      }
      Outcome::Unchanged { count } => {
        write!(f, "Snapshot already up to date ({count} obfs4 bridges).")
      }
      Outcome::Written { count } => write!(f, "Snapshot updated ({count} obfs4 bridges)."),
    }
  }
}

pub async fn run(cfg: &UpdateConfig) -> anyhow::Result<Outcome> {
  if !cfg.force && is_fresh(&cfg.output, Utc::now()) {
    tracing::info!(output = %cfg.output.display(), "snapshot fresh; skipping");
    return Ok(Outcome::Fresh);
  }

  let lines = match &cfg.source {
    ListSource::Url(url) => parse_bridge_list(&fetch_text(url).await?),
    ListSource::File(path) => {
      let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
      parse_bridge_list(&text)
    }
    ListSource::Plist(path) => {
      let xml = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
      import_legacy_plist(&xml)?
    }
  };
  if lines.is_empty() {
    anyhow::bail!("bridge list is empty; refusing to overwrite {}", cfg.output.display());
  }

  write_snapshot(&cfg.output, lines)
}

/// Replaces the obfs4 list of the snapshot at `output`, keeping the other
/// lists. Nothing is written when the result is byte-identical.
pub fn write_snapshot(output: &Path, obfs4: Vec<BridgeLine>) -> anyhow::Result<Outcome> {
  let existing = match fs::read(output) {
    Ok(b) => Some(b),
    Err(e) if e.kind() == ErrorKind::NotFound => None,
    Err(e) => return Err(e).with_context(|| format!("read {}", output.display())),
  };

  let mut snapshot = match existing.as_deref().map(BuiltInBridges::from_slice) {
    Some(Ok(s)) => s,
    Some(Err(e)) => {
      tracing::warn!(
        output = %output.display(),
        error = %e,
        "existing snapshot unreadable; starting fresh"
      );
      BuiltInBridges::default()
    }
    None => BuiltInBridges::default(),
  };

  let count = obfs4.len();
  snapshot.set(BridgeKind::Obfs4, obfs4);
  let bytes = snapshot.to_vec()?;

  if existing.as_deref().map(sha256_hex) == Some(sha256_hex(&bytes)) {
    return Ok(Outcome::Unchanged { count });
  }

  atomic_write_file(output, &bytes)?;
  tracing::info!(
    output = %output.display(),
    count,
    sha256 = %sha256_hex(&bytes),
    "snapshot written"
  );
  Ok(Outcome::Written { count })
}

pub fn parse_bridge_list(text: &str) -> Vec<BridgeLine> {
  text
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.starts_with('#'))
    .map(BridgeLine::parse)
    .filter(|b| {
      let ok = b.address().is_some();
      if !ok {
        tracing::debug!(line = b.raw(), "skipping line without address");
      }
      ok
    })
    .collect()
}

fn is_fresh(output: &Path, now: DateTime<Utc>) -> bool {
  let Ok(modified) = fs::metadata(output).and_then(|m| m.modified()) else {
    return false;
  };
  now - DateTime::<Utc>::from(modified) < Duration::hours(MIN_UPDATE_INTERVAL_HOURS)
}

async fn fetch_text(url: &str) -> anyhow::Result<String> {
  let url = Url::parse(url).with_context(|| format!("invalid list URL {url}"))?;
  println!("Fetching {url}");

  let transport = ReqwestTransport::new(&TransportOptions::default())?;
  let response = transport
    .send(HttpRequest::new(Method::GET, url.clone()))
    .await
    .with_context(|| format!("fetch {url}"))?;
  if response.status != 200 {
    anyhow::bail!("fetch {url}: HTTP {}", response.status);
  }
  String::from_utf8(response.body).context("bridge list is not UTF-8")
}

fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bridge-updater-{label}-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  const LIST: &str = "\
# comment
obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C cert=abc iat-mode=0

  obfs4 [2001:db8::1]:8443 D5B7CD6946FF10C5B3E89691A7D3F2C122D2117C cert=def iat-mode=1
garbage
";

  #[test]
  fn parses_args() {
    let cfg = UpdateConfig::from_args(&args(&[
      "bridge-updater",
      "--input",
      "list.txt",
      "--output",
      "out.json",
      "--force",
    ]))
    .unwrap();
    assert_eq!(cfg.source, ListSource::File(PathBuf::from("list.txt")));
    assert_eq!(cfg.output, PathBuf::from("out.json"));
    assert!(cfg.force);

    let cfg = UpdateConfig::from_args(&args(&["bridge-updater", "--output", "out.json"])).unwrap();
    assert_eq!(cfg.source, ListSource::Url(DEFAULT_LIST_URL.to_string()));
    assert!(!cfg.force);

    assert!(UpdateConfig::from_args(&args(&["bridge-updater", "--output"])).is_err());
    assert!(UpdateConfig::from_args(&args(&["bridge-updater", "--bogus"])).is_err());
  }

  #[test]
  fn list_parsing_keeps_addressed_lines() {
    let lines = parse_bridge_list(LIST);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].port(), Some(443));
    assert!(lines[1].raw().ends_with("iat-mode=1"));
  }

  #[test]
  fn snapshot_keeps_other_kinds_and_skips_identical_write() {
    let dir = temp_dir("snapshot");
    let out = dir.join("builtin-bridges.json");

    let mut seed = BuiltInBridges::default();
    seed.set(
      BridgeKind::Snowflake,
      vec![BridgeLine::parse("snowflake 192.0.2.3:80 2B280B23E1107BB62ABFC40DDCC8824814F80A72")],
    );
    fs::write(&out, seed.to_vec().unwrap()).unwrap();

    let outcome = write_snapshot(&out, parse_bridge_list(LIST)).unwrap();
    assert_eq!(outcome, Outcome::Written { count: 2 });

    let written = BuiltInBridges::from_slice(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(written.get(BridgeKind::Obfs4).len(), 2);
    assert_eq!(written.get(BridgeKind::Snowflake).len(), 1);

    let outcome = write_snapshot(&out, parse_bridge_list(LIST)).unwrap();
    assert_eq!(outcome, Outcome::Unchanged { count: 2 });
    let _ = fs::remove_dir_all(dir);
  }

  #[test]
  fn freshness_follows_mtime() {
    let dir = temp_dir("fresh");
    let out = dir.join("builtin-bridges.json");
    assert!(!is_fresh(&out, Utc::now()));

    fs::write(&out, "{}").unwrap();
    assert!(is_fresh(&out, Utc::now()));
    assert!(!is_fresh(&out, Utc::now() + Duration::hours(25)));
    let _ = fs::remove_dir_all(dir);
  }

  #[tokio::test]
  async fn fresh_output_is_skipped_without_force() {
    let dir = temp_dir("skip");
    let out = dir.join("builtin-bridges.json");
    fs::write(&out, "{}").unwrap();
    let list = dir.join("list.txt");
    fs::write(&list, LIST).unwrap();

    let mut cfg = UpdateConfig {
      source: ListSource::File(list),
      output: out.clone(),
      force: false,
    };
    assert_eq!(run(&cfg).await.unwrap(), Outcome::Fresh);
    assert_eq!(fs::read_to_string(&out).unwrap(), "{}");

    cfg.force = true;
    assert_eq!(run(&cfg).await.unwrap(), Outcome::Written { count: 2 });
    let _ = fs::remove_dir_all(dir);
  }

  #[tokio::test]
  async fn empty_list_is_refused() {
    let dir = temp_dir("empty");
    let list = dir.join("list.txt");
    fs::write(&list, "# nothing\n").unwrap();
    let cfg = UpdateConfig {
      source: ListSource::File(list),
      output: dir.join("out.json"),
      force: true,
    };
    assert!(run(&cfg).await.is_err());
    assert!(!dir.join("out.json").exists());
    let _ = fs::remove_dir_all(dir);
  }
}
