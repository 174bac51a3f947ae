//! Lifecycle of one tap-to-tap cache table.
//!
//! A [`TvpbCache`] opens from, in order, a shared buffer published in the
//! injected [`BufferRegistry`], a static file, or a dynamic file, and falls
//! back to an empty table. New rows are appended with
//! [`extend`](TvpbCache::extend). On [`close`](TvpbCache::close) a dirty
//! table is written as a static file once every uid is present, or as a
//! dynamic file while partial, the latter only when rebuilding.
//!
//! The static file carries no header; its shape comes from the uid
//! calculator. Changing the segmentation, the access points or the sets
//! without running [`cleanup`](TvpbCache::cleanup) leaves a stale file that
//! is only rejected if its length happens to differ.

use crate::buffer::{BufferRegistry, DataBuffer};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::metrics::memo;
use crate::persist::{
    cache_path, read_dynamic, remove_if_exists, write_dynamic, write_static, write_trace,
    CacheKind, StaticFile,
};
use crate::table::{CacheTable, DynamicTable, StaticTable};
use crate::uid::TapTapUidCalculator;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Load whatever cache is available
    Normal,
    /// Ignore existing artifacts and start empty
    Rebuild,
}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing changed since open
    Unchanged,
    /// Fully populated table written as the static file
    Static,
    /// Partial table written as the dynamic file
    Dynamic,
    /// Partial table not written because rebuild is disabled
    Suppressed,
}

#[derive(Debug)]
pub struct TvpbCache {
    tag: String,
    config: CacheConfig,
    uid_calculator: Arc<TapTapUidCalculator>,
    registry: Option<Arc<BufferRegistry>>,
    table: Option<CacheTable>,
    is_open: bool,
    is_changed: bool,
}

impl TvpbCache {
    /// `registry` is `Some` when caches are shared between worker processes.
    pub fn new(
        tag: impl Into<String>,
        config: CacheConfig,
        uid_calculator: Arc<TapTapUidCalculator>,
        registry: Option<Arc<BufferRegistry>>,
    ) -> Self {
        Self {
            tag: tag.into(),
            config,
            uid_calculator,
            registry,
            table: None,
            is_open: false,
            is_changed: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn uid_calculator(&self) -> &TapTapUidCalculator {
        &self.uid_calculator
    }

    pub fn is_shared(&self) -> bool {
        self.registry.is_some()
    }

    pub fn cache_path(&self, kind: CacheKind) -> PathBuf {
        cache_path(&self.config.dir, &self.tag, kind)
    }

    /// Pre-run housekeeping: when rebuilding, delete every artifact of this
    /// cache so a previous run's files cannot be mistaken for valid data.
    pub fn cleanup(&self) -> Result<()> {
        if self.is_open {
            return Err(Error::StillOpen(self.tag.clone()));
        }
        if !self.config.rebuild {
            return Ok(());
        }

        for kind in CacheKind::ALL {
            let path = self.cache_path(kind);
            if remove_if_exists(&path)? {
                tracing::debug!(tag = %self.tag, path = %path.display(), "Deleted cache file");
            }
        }
        Ok(())
    }

    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        if self.is_open {
            return Err(Error::AlreadyOpen(self.tag.clone()));
        }
        let _timer = memo(format!("open {}", self.tag));

        self.table = match mode {
            OpenMode::Rebuild => {
                tracing::info!(tag = %self.tag, "Rebuilding cache, ignoring existing files");
                None
            }
            OpenMode::Normal => self.load()?,
        };
        self.is_open = true;
        self.is_changed = false;
        Ok(())
    }

    fn load(&self) -> Result<Option<CacheTable>> {
        let (rows, _) = self.uid_calculator.fully_populated_shape();
        let columns = self.uid_calculator.set_names().to_vec();

        if let Some(registry) = &self.registry {
            let buffer = registry.get(&self.tag)?;
            tracing::info!(tag = %self.tag, rows = rows, "Using shared cache buffer");
            let table = StaticTable::shared(buffer, columns, rows)?;
            return Ok(Some(CacheTable::Static(table)));
        }

        let static_path = self.cache_path(CacheKind::Static);
        if let Some(file) = StaticFile::open(&static_path, self.uid_calculator.fully_populated_len())? {
            tracing::info!(tag = %self.tag, path = %static_path.display(), "Mapped static cache");
            let table = StaticTable::mapped(file, columns, rows)?;
            return Ok(Some(CacheTable::Static(table)));
        }

        let dynamic_path = self.cache_path(CacheKind::Dynamic);
        if let Some(contents) = read_dynamic(&dynamic_path)? {
            let table = DynamicTable::from_contents(contents, &columns, rows as u64)?;
            tracing::info!(
                tag = %self.tag,
                path = %dynamic_path.display(),
                rows = table.len(),
                "Loaded dynamic cache"
            );
            return Ok(Some(CacheTable::Dynamic(table)));
        }

        tracing::info!(tag = %self.tag, "No cache found, starting empty");
        Ok(None)
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_changed(&self) -> bool {
        self.is_changed
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen(self.tag.clone()));
        }
        Ok(())
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.is_open {
            return Err(Error::StillOpen(self.tag.clone()));
        }
        Ok(())
    }

    /// `None` while open means nothing has been cached yet.
    pub fn table(&self) -> Result<Option<&CacheTable>> {
        self.ensure_open()?;
        Ok(self.table.as_ref())
    }

    /// Cached row for `uid`, if present.
    pub fn row(&self, uid: u64) -> Result<Option<Vec<f32>>> {
        Ok(self.table()?.and_then(|table| table.row(uid)))
    }

    pub fn is_fully_populated(&self) -> Result<bool> {
        self.ensure_open()?;
        let (rows, _) = self.uid_calculator.fully_populated_shape();
        Ok(self.table.as_ref().map(|t| t.len() == rows).unwrap_or(false))
    }

    /// Adds newly computed `(uid, values)` rows. Uids must be new, unique and
    /// inside the key space, and each row needs one value per set.
    pub fn extend(&mut self, new_rows: Vec<(u64, Vec<f32>)>) -> Result<()> {
        if self.is_fully_populated()? {
            return Err(Error::FullyPopulated(self.tag.clone()));
        }

        let added = match &mut self.table {
            Some(CacheTable::Dynamic(dynamic)) => dynamic.extend(new_rows)?,
            // static tables are always fully populated
            Some(CacheTable::Static(_)) => return Err(Error::FullyPopulated(self.tag.clone())),
            None => {
                // installed only once the first batch is accepted
                let (rows, _) = self.uid_calculator.fully_populated_shape();
                let mut dynamic =
                    DynamicTable::new(self.uid_calculator.set_names().to_vec(), rows as u64);
                let added = dynamic.extend(new_rows)?;
                self.table = Some(CacheTable::Dynamic(dynamic));
                added
            }
        };

        self.is_changed = true;
        let rows = self.table.as_ref().map(|t| t.len()).unwrap_or(0);
        tracing::debug!(tag = %self.tag, added = added, rows = rows, "Extended cache");
        Ok(())
    }

    /// Persists a dirty table according to how populated it is.
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        self.ensure_open()?;
        if !self.is_changed {
            return Ok(FlushOutcome::Unchanged);
        }
        let _timer = memo(format!("flush {}", self.tag));

        let dynamic = match &self.table {
            Some(CacheTable::Dynamic(dynamic)) => dynamic,
            _ => {
                return Err(Error::CorruptedCache(format!(
                    "cache '{}' is marked changed without a dynamic table",
                    self.tag
                )))
            }
        };
        let buffer_size = self.config.write_buffer_size;

        let outcome = if dynamic.is_complete() {
            let values = dynamic.to_static_values()?;
            write_static(&self.cache_path(CacheKind::Static), &values, buffer_size)?;
            FlushOutcome::Static
        } else if self.config.rebuild {
            write_dynamic(
                &self.cache_path(CacheKind::Dynamic),
                dynamic.columns(),
                dynamic.rows(),
                buffer_size,
            )?;
            FlushOutcome::Dynamic
        } else {
            tracing::info!(
                tag = %self.tag,
                rows = dynamic.len(),
                "Not writing partial cache, rebuild is disabled"
            );
            FlushOutcome::Suppressed
        };

        if self.config.trace_as_csv {
            write_trace(
                &self.cache_path(CacheKind::Trace),
                dynamic.columns(),
                dynamic.rows().iter().map(|(uid, row)| (*uid, row.as_slice())),
                buffer_size,
            )?;
        }

        tracing::debug!(tag = %self.tag, outcome = ?outcome, "Flushed cache");
        self.is_changed = false;
        Ok(outcome)
    }

    /// Flushes and releases the table.
    pub fn close(&mut self) -> Result<FlushOutcome> {
        let outcome = self.flush()?;
        self.table = None;
        self.is_open = false;
        tracing::debug!(tag = %self.tag, "Closed cache");
        Ok(outcome)
    }

    /// Writes an externally filled, fully populated buffer as the static file.
    pub fn write_static_cache(&self, data: &DataBuffer) -> Result<()> {
        self.ensure_closed()?;
        let expected = self.uid_calculator.fully_populated_len();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let path = self.cache_path(CacheKind::Static);
        let buffer_size = self.config.write_buffer_size;
        data.with_values(|values| write_static(&path, values, buffer_size))?;

        tracing::info!(tag = %self.tag, path = %path.display(), "Wrote static cache from buffer");
        Ok(())
    }

    /// A buffer of the fully populated size filled with the unset sentinel.
    /// Shared buffers are provisioned in the registry under this cache's tag.
    pub fn allocate_data_buffer(&self, shared: bool) -> Result<DataBuffer> {
        self.ensure_closed()?;
        let len = self.uid_calculator.fully_populated_len();

        let buffer = if shared {
            let registry = self.registry.as_ref().ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "cache '{}' has no buffer registry for shared buffers",
                    self.tag
                ))
            })?;
            DataBuffer::Shared(registry.provision(&self.tag, len)?)
        } else {
            DataBuffer::private(len)
        };

        tracing::info!(tag = %self.tag, len = len, shared = shared, "Allocated cache buffer");
        Ok(buffer)
    }

    /// Primes `buffer` from the static file, or resets it to unset when there
    /// is none.
    pub fn load_data_to_buffer(&self, buffer: &mut DataBuffer) -> Result<()> {
        self.ensure_closed()?;
        let _timer = memo(format!("load {}", self.tag));

        let path = self.cache_path(CacheKind::Static);
        match StaticFile::open(&path, self.uid_calculator.fully_populated_len())? {
            Some(file) => {
                file.load_into(buffer)?;
                tracing::info!(tag = %self.tag, path = %path.display(), "Loaded static cache into buffer");
            }
            None => {
                buffer.fill_unset()?;
                tracing::info!(tag = %self.tag, "No static cache, buffer left unset");
            }
        }
        Ok(())
    }
}

impl Drop for TvpbCache {
    fn drop(&mut self) {
        if self.is_open && self.is_changed {
            tracing::warn!(tag = %self.tag, "Cache dropped while open with unflushed rows");
        }
    }
}
