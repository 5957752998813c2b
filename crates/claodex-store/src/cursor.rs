use serde::Serialize;
use std::fs;
use std::path::Path;

use claodex_core::{Agent, ClaodexError, Result};

use crate::fsutil::{count_lines, write_atomic};
use crate::participant::SessionParticipants;
use crate::paths::{delivery_cursor_file, read_cursor_file};

/// Read the strict cursor format, creating `0\n` when the file is missing.
///
/// A cursor is a 1-indexed line number; `0` means before the first line.
pub fn read_cursor(path: &Path) -> Result<u64> {
    if !path.exists() {
        write_atomic(path, b"0\n")?;
        return Ok(0);
    }

    let content = fs::read_to_string(path)?;
    if !content.ends_with('\n') {
        return Err(ClaodexError::Validation(format!(
            "corrupt cursor: {}",
            path.display()
        )));
    }
    let value = content.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClaodexError::Validation(format!(
            "corrupt cursor: {}",
            path.display()
        )));
    }
    value.parse::<u64>().map_err(|_| {
        ClaodexError::Validation(format!("corrupt cursor: {}", path.display()))
    })
}

/// Persist a cursor value. Retreats are rejected as programming errors.
pub fn write_cursor(path: &Path, value: u64) -> Result<()> {
    let current = read_cursor(path)?;
    if value < current {
        return Err(ClaodexError::CursorRetreat {
            path: path.to_path_buf(),
            current,
            requested: value,
        });
    }
    write_atomic(path, format!("{value}\n").as_bytes())
}

/// Read cursor into one agent's session log.
pub fn read_read_cursor(workspace_root: &Path, source: Agent) -> Result<u64> {
    read_cursor(&read_cursor_file(workspace_root, source))
}

pub fn write_read_cursor(workspace_root: &Path, source: Agent, value: u64) -> Result<()> {
    write_cursor(&read_cursor_file(workspace_root, source), value)
}

/// Highest peer-log line already injected into one target agent.
pub fn read_delivery_cursor(workspace_root: &Path, target: Agent) -> Result<u64> {
    read_cursor(&delivery_cursor_file(workspace_root, target))
}

pub fn write_delivery_cursor(workspace_root: &Path, target: Agent, value: u64) -> Result<()> {
    write_cursor(&delivery_cursor_file(workspace_root, target), value)
}

/// Seed all four cursors to the current session-file line counts, so nothing
/// written before this session becomes delta.
pub fn initialize_cursors_from_line_counts(
    workspace_root: &Path,
    participants: &SessionParticipants,
) -> Result<()> {
    let claude_lines = count_lines(&participants.for_agent(Agent::Claude).session_file)?;
    let codex_lines = count_lines(&participants.for_agent(Agent::Codex).session_file)?;

    write_read_cursor(workspace_root, Agent::Claude, claude_lines)?;
    write_read_cursor(workspace_root, Agent::Codex, codex_lines)?;
    write_delivery_cursor(workspace_root, Agent::Claude, codex_lines)?;
    write_delivery_cursor(workspace_root, Agent::Codex, claude_lines)?;
    Ok(())
}

/// Read/delivery cursor snapshot for status output.
#[derive(Debug, Clone, Serialize)]
pub struct CursorSnapshot {
    pub read_claude: u64,
    pub read_codex: u64,
    pub to_claude: u64,
    pub to_codex: u64,
}

pub fn cursor_snapshot(workspace_root: &Path) -> Result<CursorSnapshot> {
    Ok(CursorSnapshot {
        read_claude: read_read_cursor(workspace_root, Agent::Claude)?,
        read_codex: read_read_cursor(workspace_root, Agent::Codex)?,
        to_claude: read_delivery_cursor(workspace_root, Agent::Claude)?,
        to_codex: read_delivery_cursor(workspace_root, Agent::Codex)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_cursor_creates_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cursors").join("read-claude.cursor");
        assert_eq!(read_cursor(&path).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0\n");
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.cursor");
        write_cursor(&path, 42).unwrap();
        assert_eq!(read_cursor(&path).unwrap(), 42);
    }

    #[test]
    fn write_rejects_retreat() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.cursor");
        write_cursor(&path, 10).unwrap();
        let err = write_cursor(&path, 9).unwrap_err();
        assert!(matches!(
            err,
            ClaodexError::CursorRetreat {
                current: 10,
                requested: 9,
                ..
            }
        ));
        // value on disk untouched
        assert_eq!(read_cursor(&path).unwrap(), 10);
    }

    #[test]
    fn write_same_value_is_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.cursor");
        write_cursor(&path, 7).unwrap();
        write_cursor(&path, 7).unwrap();
        assert_eq!(read_cursor(&path).unwrap(), 7);
    }

    #[test]
    fn corrupt_cursor_rejected() {
        let tmp = tempfile::tempdir().unwrap();

        let no_newline = tmp.path().join("a.cursor");
        fs::write(&no_newline, "12").unwrap();
        assert!(read_cursor(&no_newline).is_err());

        let non_numeric = tmp.path().join("b.cursor");
        fs::write(&non_numeric, "twelve\n").unwrap();
        assert!(read_cursor(&non_numeric).is_err());

        let negative = tmp.path().join("c.cursor");
        fs::write(&negative, "-3\n").unwrap();
        assert!(read_cursor(&negative).is_err());
    }
}
