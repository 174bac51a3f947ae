//! Data buffers backing a fully populated cache table.
//!
//! A buffer is either private to this process or a [`SharedBuffer`] that every
//! worker maps from the same file. Shared buffers are looked up by cache tag in
//! a [`BufferRegistry`].

mod registry;
mod shared;

pub use registry::BufferRegistry;
pub use shared::{SharedBuffer, SharedBufferGuard};

use crate::error::{Error, Result};
use std::sync::Arc;

/// Sentinel for a cell that has not been computed yet.
pub const UNSET: f32 = f32::NAN;

pub(crate) const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// `true` if `value` is the unset sentinel.
pub fn is_unset(value: f32) -> bool {
    value.is_nan()
}

#[derive(Debug)]
pub enum DataBuffer {
    Private(Vec<f32>),
    Shared(Arc<SharedBuffer>),
}

impl DataBuffer {
    /// A private buffer of `len` unset cells.
    pub fn private(len: usize) -> Self {
        DataBuffer::Private(vec![UNSET; len])
    }

    pub fn len(&self) -> usize {
        match self {
            DataBuffer::Private(values) => values.len(),
            DataBuffer::Shared(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, DataBuffer::Shared(_))
    }

    pub fn fill_unset(&mut self) -> Result<()> {
        match self {
            DataBuffer::Private(values) => values.fill(UNSET),
            DataBuffer::Shared(buffer) => buffer.lock()?.fill(UNSET),
        }
        Ok(())
    }

    /// Replace the contents with `values`; lengths must match.
    pub fn copy_from(&mut self, values: &[f32]) -> Result<()> {
        match self {
            DataBuffer::Private(own) => {
                if own.len() != values.len() {
                    return Err(Error::SizeMismatch {
                        expected: own.len(),
                        actual: values.len(),
                    });
                }
                own.copy_from_slice(values);
                Ok(())
            }
            DataBuffer::Shared(buffer) => buffer.lock()?.copy_from(values),
        }
    }

    pub fn write(&mut self, offset: usize, values: &[f32]) -> Result<()> {
        match self {
            DataBuffer::Private(own) => {
                let end = offset
                    .checked_add(values.len())
                    .filter(|end| *end <= own.len())
                    .ok_or(Error::SizeMismatch {
                        expected: own.len(),
                        actual: offset.saturating_add(values.len()),
                    })?;
                own[offset..end].copy_from_slice(values);
                Ok(())
            }
            DataBuffer::Shared(buffer) => buffer.lock()?.write(offset, values),
        }
    }

    /// Copy `out.len()` cells starting at `offset`.
    pub fn read(&self, offset: usize, out: &mut [f32]) -> Result<()> {
        match self {
            DataBuffer::Private(own) => {
                let end = offset
                    .checked_add(out.len())
                    .filter(|end| *end <= own.len())
                    .ok_or(Error::SizeMismatch {
                        expected: own.len(),
                        actual: offset.saturating_add(out.len()),
                    })?;
                out.copy_from_slice(&own[offset..end]);
                Ok(())
            }
            DataBuffer::Shared(buffer) => buffer.read(offset, out),
        }
    }

    /// Number of cells still holding the unset sentinel.
    pub fn count_unset(&self) -> Result<usize> {
        match self {
            DataBuffer::Private(own) => Ok(own.iter().filter(|v| is_unset(**v)).count()),
            DataBuffer::Shared(buffer) => {
                let values = buffer.lock()?.to_vec();
                Ok(values.iter().filter(|v| is_unset(**v)).count())
            }
        }
    }

    /// Run `f` over a consistent view of the whole buffer. Shared buffers are
    /// snapshotted under the lock.
    pub fn with_values<T>(&self, f: impl FnOnce(&[f32]) -> Result<T>) -> Result<T> {
        match self {
            DataBuffer::Private(own) => f(own),
            DataBuffer::Shared(buffer) => {
                let values = buffer.lock()?.to_vec();
                f(&values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_private_buffer() -> Result<()> {
        let mut buffer = DataBuffer::private(4);
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.is_shared());
        assert_eq!(buffer.count_unset()?, 4);

        buffer.write(1, &[1.0, 2.0])?;
        assert_eq!(buffer.count_unset()?, 2);

        let mut out = [0.0; 2];
        buffer.read(1, &mut out)?;
        assert_eq!(out, [1.0, 2.0]);

        assert!(buffer.write(3, &[1.0, 2.0]).is_err());
        assert!(matches!(
            buffer.copy_from(&[0.0; 3]),
            Err(Error::SizeMismatch { expected: 4, actual: 3 })
        ));

        buffer.fill_unset()?;
        assert_eq!(buffer.count_unset()?, 4);
        Ok(())
    }

    #[test]
    fn test_shared_buffer_behaves_like_private() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = BufferRegistry::new(temp_dir.path())?;
        let mut buffer = DataBuffer::Shared(registry.provision("tap_tap", 4)?);

        assert!(buffer.is_shared());
        assert_eq!(buffer.count_unset()?, 4);

        buffer.copy_from(&[1.0, 2.0, 3.0, 4.0])?;
        let sum = buffer.with_values(|values| Ok(values.iter().sum::<f32>()))?;
        assert_eq!(sum, 10.0);

        buffer.fill_unset()?;
        assert_eq!(buffer.count_unset()?, 4);
        Ok(())
    }
}
