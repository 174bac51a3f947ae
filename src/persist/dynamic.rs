use super::write_replace;
use crate::error::{Error, Result};
use crate::hasher::{self, Hasher};
use crate::multi_writer::MultiWriter;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed header size; unused trailing bytes are zero.
pub const HEADER_SIZE: usize = 64;

const MAGIC: u32 = 0x54_56_44_59; // ASCII "TVDY"
const VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic_number: u32,
    pub version: u16,
    pub row_count: u64,
    pub column_count: u32,
    pub body_len: u64,
    pub checksum: u64,
}

impl Header {
    pub fn new(row_count: u64, column_count: u32) -> Self {
        Header {
            magic_number: MAGIC,
            version: VERSION,
            row_count,
            column_count,
            body_len: 0,
            checksum: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic_number != MAGIC || self.version != VERSION {
            return Err(Error::InvalidHeader);
        }
        Ok(())
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_u32::<BigEndian>(self.magic_number)?;
        buf.write_u16::<BigEndian>(self.version)?;
        buf.write_u64::<BigEndian>(self.row_count)?;
        buf.write_u32::<BigEndian>(self.column_count)?;
        buf.write_u64::<BigEndian>(self.body_len)?;
        buf.write_u64::<BigEndian>(self.checksum)?;
        buf.resize(HEADER_SIZE, 0);
        writer.write_all(&buf)?;
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::InvalidHeader,
            _ => Error::IoError(e),
        })?;

        let mut cursor = &buf[..];
        Ok(Header {
            magic_number: cursor.read_u32::<BigEndian>()?,
            version: cursor.read_u16::<BigEndian>()?,
            row_count: cursor.read_u64::<BigEndian>()?,
            column_count: cursor.read_u32::<BigEndian>()?,
            body_len: cursor.read_u64::<BigEndian>()?,
            checksum: cursor.read_u64::<BigEndian>()?,
        })
    }
}

#[derive(Serialize)]
struct BodyRef<'a> {
    columns: &'a [String],
    rows: Vec<(u64, &'a [f32])>,
}

#[derive(Deserialize)]
struct Body {
    columns: Vec<String>,
    rows: Vec<(u64, Vec<f32>)>,
}

/// Rows of a dynamic cache as read from disk, in ascending uid order.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicContents {
    pub columns: Vec<String>,
    pub rows: Vec<(u64, Vec<f32>)>,
}

/// Writes `rows` as a dynamic cache file: header, then the bincode body. The
/// checksum is accumulated while the body streams out and the header is
/// rewritten once it is known.
pub fn write_dynamic(
    path: &Path,
    columns: &[String],
    rows: &BTreeMap<u64, Vec<f32>>,
    buffer_size: usize,
) -> Result<()> {
    let body = BodyRef {
        columns,
        rows: rows.iter().map(|(uid, row)| (*uid, row.as_slice())).collect(),
    };
    let mut header = Header::new(rows.len() as u64, columns.len() as u32);

    write_replace(path, |file| {
        header.encode(file)?;

        let mut hasher = Hasher::new();
        {
            let mut buffered = BufWriter::with_capacity(buffer_size, &mut *file);
            let mut writer =
                MultiWriter::new(vec![&mut buffered as &mut dyn Write, &mut hasher as &mut dyn Write]);
            bincode::serialize_into(&mut writer, &body)?;
            writer.flush()?;
        }

        header.body_len = hasher.written();
        header.checksum = hasher.checksum();

        file.seek(SeekFrom::Start(0))?;
        header.encode(file)?;
        Ok(())
    })?;

    tracing::debug!(
        path = %path.display(),
        rows = header.row_count,
        body_len = header.body_len,
        "Wrote dynamic cache"
    );
    Ok(())
}

/// Loads a dynamic cache file if one exists. Every row must have one value per
/// column and uids must be unique; anything else is a corrupted cache.
pub fn read_dynamic(path: &Path) -> Result<Option<DynamicContents>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();

    let mut reader = BufReader::new(file);
    let header = Header::decode(&mut reader)?;
    header.validate()?;

    if header.body_len != file_len.saturating_sub(HEADER_SIZE as u64) {
        return Err(Error::CorruptedCache(format!(
            "{}: header announces {} body bytes, file holds {}",
            path.display(),
            header.body_len,
            file_len.saturating_sub(HEADER_SIZE as u64)
        )));
    }

    let mut bytes = Vec::with_capacity(header.body_len as usize);
    reader.read_to_end(&mut bytes)?;
    if hasher::checksum(&bytes) != header.checksum {
        return Err(Error::ChecksumMismatch);
    }

    let body: Body = bincode::deserialize(&bytes)?;
    validate_body(path, &header, &body)?;

    Ok(Some(DynamicContents {
        columns: body.columns,
        rows: body.rows,
    }))
}

fn validate_body(path: &Path, header: &Header, body: &Body) -> Result<()> {
    let corrupted = |msg: String| Error::CorruptedCache(format!("{}: {}", path.display(), msg));

    if body.columns.len() != header.column_count as usize {
        return Err(corrupted(format!(
            "{} columns, header says {}",
            body.columns.len(),
            header.column_count
        )));
    }
    if body.rows.len() as u64 != header.row_count {
        return Err(corrupted(format!(
            "{} rows, header says {}",
            body.rows.len(),
            header.row_count
        )));
    }
    if let Some((uid, row)) = body.rows.iter().find(|(_, row)| row.len() != body.columns.len()) {
        return Err(corrupted(format!(
            "row {} has {} values for {} columns",
            uid,
            row.len(),
            body.columns.len()
        )));
    }
    if let Some(uid) = body.rows.iter().map(|(uid, _)| *uid).duplicates().next() {
        return Err(corrupted(format!("duplicate uid {}", uid)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn columns() -> Vec<String> {
        vec!["fastest".to_string(), "cheapest".to_string()]
    }

    fn sample_rows() -> BTreeMap<u64, Vec<f32>> {
        BTreeMap::from([(7, vec![7.0, 0.7]), (0, vec![0.5, f32::NAN]), (3, vec![3.0, 0.3])])
    }

    #[test]
    fn test_header_encoding() -> Result<()> {
        let mut header = Header::new(12, 3);
        header.body_len = 99;
        header.checksum = 0xDEAD_BEEF;

        let mut buf = Vec::new();
        header.encode(&mut buf)?;
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], b"TVDY");

        let decoded = Header::decode(&mut buf.as_slice())?;
        assert_eq!(decoded, header);
        decoded.validate()?;
        Ok(())
    }

    #[test]
    fn test_short_header_is_invalid() {
        let buf = vec![0u8; HEADER_SIZE - 1];
        assert!(matches!(
            Header::decode(&mut buf.as_slice()),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn test_rows_come_back_in_uid_order() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.dyn");

        write_dynamic(&path, &columns(), &sample_rows(), 64)?;
        let contents = read_dynamic(&path)?.expect("dynamic file exists");

        assert_eq!(contents.columns, columns());
        let uids: Vec<u64> = contents.rows.iter().map(|(uid, _)| *uid).collect();
        assert_eq!(uids, vec![0, 3, 7]);
        assert_eq!(contents.rows[2].1, vec![7.0, 0.7]);
        assert!(contents.rows[0].1[1].is_nan());
        Ok(())
    }

    #[test]
    fn test_missing_file_is_none() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        assert!(read_dynamic(&temp_dir.path().join("tap_tap.dyn"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_flipped_body_byte_fails_checksum() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.dyn");
        write_dynamic(&path, &columns(), &sample_rows(), 1024)?;

        let mut bytes = fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes)?;

        assert!(matches!(read_dynamic(&path), Err(Error::ChecksumMismatch)));
        Ok(())
    }

    #[test]
    fn test_truncated_file_is_corrupted() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.dyn");
        write_dynamic(&path, &columns(), &sample_rows(), 1024)?;

        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 4])?;

        assert!(matches!(read_dynamic(&path), Err(Error::CorruptedCache(_))));
        Ok(())
    }

    #[test]
    fn test_duplicate_uids_on_disk_are_corruption() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.dyn");

        // BTreeMap cannot hold duplicates, so hand-assemble the file.
        let columns = columns();
        let row = [1.0f32, 2.0];
        let body = BodyRef {
            columns: &columns,
            rows: vec![(4, &row[..]), (4, &row[..])],
        };
        let encoded = bincode::serialize(&body)?;
        let mut header = Header::new(2, 2);
        header.body_len = encoded.len() as u64;
        header.checksum = hasher::checksum(&encoded);

        let mut bytes = Vec::new();
        header.encode(&mut bytes)?;
        bytes.extend_from_slice(&encoded);
        fs::write(&path, &bytes)?;

        let result = read_dynamic(&path);
        assert!(matches!(result, Err(Error::CorruptedCache(ref msg)) if msg.contains("duplicate uid 4")));
        Ok(())
    }
}
