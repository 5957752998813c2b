use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use claodex_core::Result;

/// Atomic write: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        claodex_core::ClaodexError::Validation(format!("no parent dir for {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| claodex_core::ClaodexError::Io(err.error))?;
    Ok(())
}

/// Count physical lines. Missing files count as empty.
pub fn count_lines(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0u64;
    for line in reader.lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Read lines strictly after `start_line` (1-indexed cursor, exclusive) and
/// up to `end_line` (inclusive) when given.
pub fn read_lines_between(path: &Path, start_line: u64, end_line: Option<u64>) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    if !path.exists() {
        return Ok(lines);
    }
    let reader = BufReader::new(File::open(path)?);
    for (index, line) in reader.lines().enumerate() {
        let line_number = index as u64 + 1;
        let line = line?;
        if line_number <= start_line {
            continue;
        }
        if let Some(end) = end_line {
            if line_number > end {
                break;
            }
        }
        lines.push(line);
    }
    Ok(lines)
}
