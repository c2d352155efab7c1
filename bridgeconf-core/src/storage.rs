use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Temp file next to `dst`, then rename. The last concurrent rename wins.
pub fn atomic_write_file(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
  let dir = dst
    .parent()
    .ok_or_else(|| anyhow::anyhow!("destination has no parent directory"))?;
  fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

  let tmp = tmp_path(dst);
  if let Err(e) = fs::write(&tmp, bytes) {
    let _ = fs::remove_file(&tmp);
    return Err(e).with_context(|| format!("write {}", tmp.display()));
  }
  if let Err(e) = fs::rename(&tmp, dst) {
    let _ = fs::remove_file(&tmp);
    return Err(e).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()));
  }
  Ok(())
}

fn tmp_path(dst: &Path) -> PathBuf {
  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
  dst.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
pub(crate) fn test_dir(label: &str) -> PathBuf {
  let dir = std::env::temp_dir()
    .join(format!("bridgeconf-{label}-{}", uuid::Uuid::new_v4().simple()));
  fs::create_dir_all(&dir).unwrap();
  dir
}
