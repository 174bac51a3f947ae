use super::write_replace;
use crate::buffer::{DataBuffer, ELEMENT_SIZE};
use crate::error::{Error, Result};
use byteorder::{NativeEndian, WriteBytesExt};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes `values` as a headerless native-endian `f32` array.
///
/// The shape is not stored; it is implied by the uid calculator, so a file
/// written under a different segmentation is only caught by its length.
pub fn write_static(path: &Path, values: &[f32], buffer_size: usize) -> Result<()> {
    write_replace(path, |file| {
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        for value in values {
            writer.write_f32::<NativeEndian>(*value)?;
        }
        writer.flush()?;
        Ok(())
    })?;

    tracing::debug!(path = %path.display(), len = values.len(), "Wrote static cache");
    Ok(())
}

/// Read-only mapping of a static cache file.
#[derive(Debug)]
pub struct StaticFile {
    path: PathBuf,
    map: Mmap,
    len: usize,
}

impl StaticFile {
    /// Maps `path` if it exists. The file must hold exactly `expected_len`
    /// values.
    pub fn open(path: &Path, expected_len: usize) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let bytes = file.metadata()?.len() as usize;
        if bytes % ELEMENT_SIZE != 0 {
            return Err(Error::CorruptedCache(format!(
                "{} is {} bytes, not a whole number of f32 values",
                path.display(),
                bytes
            )));
        }
        if bytes / ELEMENT_SIZE != expected_len {
            return Err(Error::SizeMismatch {
                expected: expected_len,
                actual: bytes / ELEMENT_SIZE,
            });
        }
        if expected_len == 0 {
            return Err(Error::CorruptedCache(format!("{} is empty", path.display())));
        }

        // SAFETY: cache files are only ever replaced by rename, never written
        // in place, so the mapped inode does not change underneath us.
        let map = unsafe { Mmap::map(&file)? };
        if map.as_ptr().align_offset(std::mem::align_of::<f32>()) != 0 {
            return Err(Error::CorruptedCache(format!(
                "mapping of {} is not f32 aligned",
                path.display()
            )));
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
            map,
            len: expected_len,
        }))
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

    pub fn values(&self) -> &[f32] {
        // SAFETY: length and alignment were checked in `open`, the mapping is
        // read-only and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const f32, self.len) }
    }

    /// Copies the file element for element into `buffer`.
    pub fn load_into(&self, buffer: &mut DataBuffer) -> Result<()> {
        buffer.copy_from(self.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_is_bit_exact() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.mmap");
        let values = vec![0.1f32, -2.5, f32::MAX, f32::MIN_POSITIVE, 1e-30, 42.0];

        write_static(&path, &values, 16)?;
        let file = StaticFile::open(&path, values.len())?.expect("static file exists");

        assert_eq!(file.len(), values.len());
        let read: Vec<u32> = file.values().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(read, expected);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_none() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        assert!(StaticFile::open(&temp_dir.path().join("nope.mmap"), 4)?.is_none());
        Ok(())
    }

    #[test]
    fn test_wrong_length_rejected() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.mmap");
        write_static(&path, &[1.0, 2.0, 3.0], 1024)?;

        assert!(matches!(
            StaticFile::open(&path, 4),
            Err(Error::SizeMismatch { expected: 4, actual: 3 })
        ));
        Ok(())
    }

    #[test]
    fn test_load_into_buffer() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.mmap");
        write_static(&path, &[1.0, 2.0], 1024)?;

        let file = StaticFile::open(&path, 2)?.expect("static file exists");
        let mut buffer = DataBuffer::private(2);
        file.load_into(&mut buffer)?;
        assert_eq!(buffer.count_unset()?, 0);

        let mut wrong = DataBuffer::private(3);
        assert!(matches!(
            file.load_into(&mut wrong),
            Err(Error::SizeMismatch { .. })
        ));
        Ok(())
    }
}
