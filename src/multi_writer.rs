use std::{
    fmt::Debug,
    io::{self, Write},
};

/// A writer that writes to multiple destinations simultaneously.
pub struct MultiWriter<W: Write> {
    pub writers: Vec<W>,
}

impl<W: Write> Debug for MultiWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiWriter")
            .field("writers", &self.writers.len())
            .finish()
    }
}

impl<W: Write> MultiWriter<W> {
    pub fn new(writers: Vec<W>) -> Self {
        Self { writers }
    }

    /// Hands the writers back, e.g. to finalize a checksum.
    pub fn into_inner(self) -> Vec<W> {
        self.writers
    }
}

impl<W: Write> Write for MultiWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for (i, writer) in self.writers.iter_mut().enumerate() {
            writer
                .write_all(buf)
                .map_err(|e| io::Error::new(e.kind(), format!("Writer {} failed: {}", i, e)))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for (i, writer) in self.writers.iter_mut().enumerate() {
            writer.flush().map_err(|e| {
                io::Error::new(e.kind(), format!("Writer {} failed to flush: {}", i, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{checksum, Hasher};

    #[test]
    fn test_fans_out_to_every_writer() {
        let mut first = Vec::new();
        let mut hasher = Hasher::new();
        {
            let mut writer: MultiWriter<Box<dyn Write + '_>> =
                MultiWriter::new(vec![Box::new(&mut first), Box::new(&mut hasher)]);
            writer.write_all(b"row data").unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(first, b"row data");
        assert_eq!(hasher.checksum(), checksum(b"row data"));
    }
}
