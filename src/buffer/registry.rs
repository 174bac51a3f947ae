use super::shared::SharedBuffer;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Cache tag to shared buffer, populated once per run before any cache opens
/// in shared mode. The orchestrator provisions buffers, each worker attaches
/// to them, and the registry is handed to every cache that should use them.
#[derive(Debug)]
pub struct BufferRegistry {
    dir: PathBuf,
    buffers: RwLock<HashMap<String, Arc<SharedBuffer>>>,
}

impl BufferRegistry {
    /// `dir` holds the backing files, ideally on a memory-backed filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            buffers: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn buffer_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}.shm", tag))
    }

    /// Creates a new shared buffer of `len` elements filled with the unset
    /// sentinel and registers it.
    pub fn provision(&self, tag: &str, len: usize) -> Result<Arc<SharedBuffer>> {
        let mut buffers = self.buffers.write().map_err(|_| Error::MutexPoisoned)?;
        if buffers.contains_key(tag) {
            return Err(Error::InvalidConfig(format!(
                "shared buffer '{}' is already registered",
                tag
            )));
        }

        let buffer = Arc::new(SharedBuffer::create(tag, self.buffer_path(tag), len)?);
        buffers.insert(tag.to_string(), Arc::clone(&buffer));

        tracing::info!(tag = tag, len = len, "Provisioned shared buffer");
        Ok(buffer)
    }

    /// Maps a buffer provisioned by another process and registers it.
    pub fn attach(&self, tag: &str, len: usize) -> Result<Arc<SharedBuffer>> {
        let mut buffers = self.buffers.write().map_err(|_| Error::MutexPoisoned)?;
        if let Some(existing) = buffers.get(tag) {
            if existing.len() != len {
                return Err(Error::SizeMismatch {
                    expected: len,
                    actual: existing.len(),
                });
            }
            return Ok(Arc::clone(existing));
        }

        let buffer = Arc::new(SharedBuffer::attach(tag, self.buffer_path(tag), len)?);
        buffers.insert(tag.to_string(), Arc::clone(&buffer));

        tracing::debug!(tag = tag, len = len, "Attached shared buffer");
        Ok(buffer)
    }

    /// Buffer registered under `tag`. An unknown tag means the orchestrator
    /// never published it, which is an internal consistency error.
    pub fn get(&self, tag: &str) -> Result<Arc<SharedBuffer>> {
        let buffers = self.buffers.read().map_err(|_| Error::MutexPoisoned)?;
        buffers
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::UnknownBuffer(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.buffers
            .read()
            .map(|buffers| buffers.contains_key(tag))
            .unwrap_or(false)
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        let buffers = self.buffers.read().map_err(|_| Error::MutexPoisoned)?;
        let mut tags: Vec<String> = buffers.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }

    /// Unregisters `tag` and deletes its backing files. Mappings still held by
    /// caches or other processes stay valid until they are dropped.
    pub fn remove(&self, tag: &str) -> Result<()> {
        let removed = {
            let mut buffers = self.buffers.write().map_err(|_| Error::MutexPoisoned)?;
            buffers.remove(tag)
        };
        if removed.is_none() {
            return Err(Error::UnknownBuffer(tag.to_string()));
        }

        let path = self.buffer_path(tag);
        for file in [SharedBuffer::lock_path(&path), path] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(tag = tag, "Removed shared buffer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_provision_then_get() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = BufferRegistry::new(temp_dir.path())?;

        let provisioned = registry.provision("tap_tap", 16)?;
        let fetched = registry.get("tap_tap")?;
        assert!(Arc::ptr_eq(&provisioned, &fetched));
        assert!(registry.contains("tap_tap"));
        assert_eq!(registry.tags()?, vec!["tap_tap".to_string()]);
        Ok(())
    }

    #[test]
    fn test_unknown_tag() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = BufferRegistry::new(temp_dir.path()).unwrap();

        assert!(matches!(registry.get("missing"), Err(Error::UnknownBuffer(_))));
        assert!(matches!(registry.remove("missing"), Err(Error::UnknownBuffer(_))));
    }

    #[test]
    fn test_double_provision_rejected() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = BufferRegistry::new(temp_dir.path())?;

        registry.provision("tap_tap", 4)?;
        assert!(matches!(
            registry.provision("tap_tap", 4),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_worker_registry_attaches_to_orchestrator_buffer() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let orchestrator = BufferRegistry::new(temp_dir.path())?;
        let worker = BufferRegistry::new(temp_dir.path())?;

        let buffer = orchestrator.provision("tap_tap", 4)?;
        buffer.lock()?.write(0, &[7.0])?;

        let attached = worker.attach("tap_tap", 4)?;
        assert_eq!(attached.get(0), Some(7.0));

        // attaching twice hands back the same mapping
        assert!(Arc::ptr_eq(&attached, &worker.attach("tap_tap", 4)?));
        assert!(matches!(
            worker.attach("tap_tap", 5),
            Err(Error::SizeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_remove_deletes_backing_files() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = BufferRegistry::new(temp_dir.path())?;

        registry.provision("tap_tap", 4)?;
        let path = registry.buffer_path("tap_tap");
        assert!(path.exists());

        registry.remove("tap_tap")?;
        assert!(!path.exists());
        assert!(!SharedBuffer::lock_path(&path).exists());
        assert!(!registry.contains("tap_tap"));
        Ok(())
    }
}
