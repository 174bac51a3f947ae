//! On-disk artifacts of a cache: where they live and how they are replaced.

mod dynamic;
mod static_file;
mod trace;

pub use dynamic::{read_dynamic, write_dynamic, DynamicContents, Header, HEADER_SIZE};
pub use static_file::{write_static, StaticFile};
pub use trace::write_trace;

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// The three artifacts kept per cache tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Fully populated, headerless `f32` array
    Static,
    /// Partially populated rows keyed by uid
    Dynamic,
    /// Diagnostic csv dump, never read back
    Trace,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Static, CacheKind::Dynamic, CacheKind::Trace];

    pub fn extension(&self) -> &'static str {
        match self {
            CacheKind::Static => "mmap",
            CacheKind::Dynamic => "dyn",
            CacheKind::Trace => "csv",
        }
    }
}

/// `<dir>/<tag>.<ext>`
pub fn cache_path(dir: &Path, tag: &str, kind: CacheKind) -> PathBuf {
    dir.join(format!("{}.{}", tag, kind.extension()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes a fresh `<path>.tmp` with `write`, syncs it and renames it over
/// `path`. Readers holding a mapping of the old file keep seeing the old data.
pub(crate) fn write_replace<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let result = File::create(&tmp)
        .map_err(Error::from)
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp, path).map_err(Error::from));

    if result.is_err() {
        if let Err(e) = remove_if_exists(&tmp) {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temporary file");
        }
    }
    result
}

/// Deletes `path`, treating a missing file as success. Returns whether a file
/// was removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_cache_paths() {
        let dir = Path::new("/data/cache");
        assert_eq!(
            cache_path(dir, "tap_tap", CacheKind::Static),
            PathBuf::from("/data/cache/tap_tap.mmap")
        );
        assert_eq!(
            cache_path(dir, "tap_tap", CacheKind::Dynamic),
            PathBuf::from("/data/cache/tap_tap.dyn")
        );
        assert_eq!(
            cache_path(dir, "tap_tap", CacheKind::Trace),
            PathBuf::from("/data/cache/tap_tap.csv")
        );
    }

    #[test]
    fn test_write_replace_swaps_contents() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("artifact.dyn");
        fs::write(&path, b"old")?;

        write_replace(&path, |file| {
            file.write_all(b"new")?;
            Ok(())
        })?;

        assert_eq!(fs::read(&path)?, b"new");
        assert!(!temp_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_original() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("artifact.dyn");
        fs::write(&path, b"old")?;

        let result = write_replace(&path, |file| {
            file.write_all(b"partial")?;
            Err(Error::CorruptedCache("interrupted".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&path)?, b"old");
        assert!(!temp_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_remove_if_exists() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("artifact.csv");

        assert!(!remove_if_exists(&path)?);
        fs::write(&path, b"uid\n")?;
        assert!(remove_if_exists(&path)?);
        assert!(!path.exists());
        Ok(())
    }
}
