use super::write_replace;
use crate::error::Result;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Dumps `rows` as csv with a `uid` column followed by one column per set.
/// Unset cells are written as `NaN`.
pub fn write_trace<I, R>(path: &Path, columns: &[String], rows: I, buffer_size: usize) -> Result<()>
where
    I: IntoIterator<Item = (u64, R)>,
    R: AsRef<[f32]>,
{
    let mut count = 0usize;
    write_replace(path, |file| {
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        write!(writer, "uid")?;
        for column in columns {
            write!(writer, ",{}", column)?;
        }
        writeln!(writer)?;

        for (uid, row) in rows {
            write!(writer, "{}", uid)?;
            for value in row.as_ref() {
                write!(writer, ",{}", value)?;
            }
            writeln!(writer)?;
            count += 1;
        }
        writer.flush()?;
        Ok(())
    })?;

    tracing::debug!(path = %path.display(), rows = count, "Wrote cache trace");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_trace_layout() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tap_tap.csv");
        let columns = vec!["fastest".to_string(), "cheapest".to_string()];

        write_trace(
            &path,
            &columns,
            vec![(0u64, vec![1.5f32, 2.0]), (5, vec![f32::NAN, -0.25])],
            1024,
        )?;

        let text = fs::read_to_string(&path)?;
        assert_eq!(text, "uid,fastest,cheapest\n0,1.5,2\n5,NaN,-0.25\n");
        Ok(())
    }
}
