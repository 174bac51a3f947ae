use std::fmt;
use std::io::{self, Write};

use crc::{Crc, Digest, CRC_64_ECMA_182};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Streaming crc64 over everything written to it.
pub struct Hasher {
    digest: Digest<'static, u64>,
    written: u64,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("written", &self.written)
            .finish()
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
            written: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
        self.written += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn checksum(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One-shot checksum of a byte slice.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}
