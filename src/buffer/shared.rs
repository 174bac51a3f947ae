use super::{UNSET, ELEMENT_SIZE};
use crate::error::{Error, Result};
use crate::flock::{BufferLock, BufferLockGuard};
use memmap2::{MmapOptions, MmapRaw};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// A fixed-size `f32` array visible to every process that maps the same
/// backing file, together with the lock that guards writes to it.
///
/// Cells are accessed as `AtomicU32` bit patterns, so readers copy values out
/// with [`read`](Self::read) without locking while another thread or process
/// writes. Writers go through [`lock`](Self::lock); callers partition uid
/// ranges between writers so no two processes write the same offset.
pub struct SharedBuffer {
    tag: String,
    path: PathBuf,
    map: MmapRaw,
    len: usize,
    lock: BufferLock,
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("tag", &self.tag)
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

impl SharedBuffer {
    /// Creates the backing file, maps it and fills it with [`UNSET`].
    pub fn create(tag: &str, path: impl Into<PathBuf>, len: usize) -> Result<Self> {
        let path = path.into();
        let bytes = Self::byte_len(len)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(bytes as u64)?;

        let buffer = Self::map(tag, path, &file, len)?;
        buffer.lock()?.fill(UNSET);

        tracing::debug!(tag = tag, len = len, path = %buffer.path.display(), "Created shared buffer");
        Ok(buffer)
    }

    /// Maps a buffer another process created. The backing file must hold
    /// exactly `len` elements.
    pub fn attach(tag: &str, path: impl Into<PathBuf>, len: usize) -> Result<Self> {
        let path = path.into();
        Self::byte_len(len)?;

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::UnknownBuffer(tag.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let bytes = file.metadata()?.len() as usize;
        if bytes % ELEMENT_SIZE != 0 || bytes / ELEMENT_SIZE != len {
            return Err(Error::SizeMismatch {
                expected: len,
                actual: bytes / ELEMENT_SIZE,
            });
        }

        Self::map(tag, path, &file, len)
    }

    fn map(tag: &str, path: PathBuf, file: &File, len: usize) -> Result<Self> {
        let map = MmapOptions::new().len(len * ELEMENT_SIZE).map_raw(file)?;
        if map.as_ptr().align_offset(std::mem::align_of::<AtomicU32>()) != 0 {
            return Err(Error::InvalidConfig(format!(
                "shared buffer '{}' is not word aligned",
                tag
            )));
        }

        let lock = BufferLock::open(Self::lock_path(&path))?;

        Ok(Self {
            tag: tag.to_string(),
            path,
            map,
            len,
            lock,
        })
    }

    fn byte_len(len: usize) -> Result<usize> {
        if len == 0 {
            return Err(Error::InvalidConfig("shared buffer must not be empty".to_string()));
        }
        len.checked_mul(ELEMENT_SIZE)
            .ok_or_else(|| Error::InvalidConfig("shared buffer too large".to_string()))
    }

    pub fn lock_path(path: &Path) -> PathBuf {
        path.with_extension("lock")
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cells(&self) -> &[AtomicU32] {
        // SAFETY: the mapping holds len 4-byte cells, alignment was checked at
        // map time, and every access goes through atomic loads and stores.
        unsafe { std::slice::from_raw_parts(self.map.as_mut_ptr() as *const AtomicU32, self.len) }
    }

    fn check_range(&self, offset: usize, count: usize) -> Result<()> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::SizeMismatch {
                expected: self.len,
                actual: offset.saturating_add(count),
            }),
        }
    }

    /// Copies `out.len()` values starting at `offset`.
    pub fn read(&self, offset: usize, out: &mut [f32]) -> Result<()> {
        self.check_range(offset, out.len())?;
        let cells = &self.cells()[offset..offset + out.len()];
        for (value, cell) in out.iter_mut().zip(cells) {
            *value = f32::from_bits(cell.load(Ordering::Acquire));
        }
        Ok(())
    }

    /// Single value at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<f32> {
        self.cells()
            .get(index)
            .map(|cell| f32::from_bits(cell.load(Ordering::Acquire)))
    }

    /// Blocks until this process holds the buffer lock.
    pub fn lock(&self) -> Result<SharedBufferGuard<'_>> {
        let guard = self.lock.acquire()?;
        Ok(SharedBufferGuard {
            buffer: self,
            _lock: guard,
        })
    }
}

/// Write access to a [`SharedBuffer`] for as long as the lock is held.
#[derive(Debug)]
pub struct SharedBufferGuard<'a> {
    buffer: &'a SharedBuffer,
    _lock: BufferLockGuard<'a>,
}

impl SharedBufferGuard<'_> {
    /// Writes `values` starting at `offset`.
    pub fn write(&mut self, offset: usize, values: &[f32]) -> Result<()> {
        self.buffer.check_range(offset, values.len())?;
        let cells = &self.buffer.cells()[offset..offset + values.len()];
        for (cell, value) in cells.iter().zip(values) {
            cell.store(value.to_bits(), Ordering::Release);
        }
        Ok(())
    }

    /// Replaces the whole buffer with `values`; sizes must match exactly.
    pub fn copy_from(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.buffer.len {
            return Err(Error::SizeMismatch {
                expected: self.buffer.len,
                actual: values.len(),
            });
        }
        self.write(0, values)
    }

    pub fn fill(&mut self, value: f32) {
        let bits = value.to_bits();
        for cell in self.buffer.cells() {
            cell.store(bits, Ordering::Release);
        }
    }

    /// Snapshot of the whole buffer taken while writers are excluded.
    pub fn to_vec(&self) -> Vec<f32> {
        self.buffer
            .cells()
            .iter()
            .map(|cell| f32::from_bits(cell.load(Ordering::Acquire)))
            .collect()
    }
}
