//! `metadata.json`: capture-wide record, rewritten atomically on every change
//! that needs to survive a crash (rotation, stop).

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::Metadata;

pub const METADATA_FILENAME: &str = "metadata.json";

pub fn path_in(dir: &Path) -> std::path::PathBuf {
    dir.join(METADATA_FILENAME)
}

pub fn read(dir: &Path) -> Result<Metadata> {
    let path = path_in(dir);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let meta: Metadata =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok(meta)
}

/// Write-temp + rename: never leaves a half-written `metadata.json` behind.
pub fn write_atomic(dir: &Path, meta: &Metadata) -> Result<()> {
    let path = path_in(dir);
    let tmp_path = dir.join(format!(".{METADATA_FILENAME}.tmp"));
    let pretty = serde_json::to_vec_pretty(meta)?;
    std::fs::write(&tmp_path, &pretty)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Metadata::new_live(Utc::now(), None);
        write_atomic(dir.path(), &meta).unwrap();
        let read_back = read(dir.path()).unwrap();
        assert_eq!(read_back.version, meta.version);
        assert!(read_back.is_live());
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path()).is_err());
    }
}
