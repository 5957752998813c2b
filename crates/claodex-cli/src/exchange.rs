//! Per-collab exchange transcript: a markdown file written incrementally as
//! messages arrive, closed with a summary footer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use claodex_core::{strip_routing_signals, Result};
use claodex_store::exchanges_dir;

fn to_local(ts: OffsetDateTime) -> OffsetDateTime {
    UtcOffset::current_local_offset()
        .map(|offset| ts.to_offset(offset))
        .unwrap_or(ts)
}

/// `H:MM AM/PM` in local time.
fn format_clock(ts: OffsetDateTime) -> String {
    let local = to_local(ts);
    local
        .format(format_description!(
            "[hour repr:12 padding:none]:[minute] [period]"
        ))
        .unwrap_or_default()
}

/// Incremental writer for one collab session's transcript.
pub struct ExchangeLog {
    path: PathBuf,
    file: File,
    messages_written: usize,
}

impl ExchangeLog {
    /// Create the transcript file, named by local start time.
    pub fn create(
        workspace_root: &Path,
        initial_message: &str,
        initiated_by: &str,
        started_at: OffsetDateTime,
    ) -> Result<Self> {
        let dir = exchanges_dir(workspace_root);
        std::fs::create_dir_all(&dir)?;

        let local = to_local(started_at);
        let stamp = local
            .format(format_description!(
                "[year repr:last_two][month][day]-[hour][minute][second]"
            ))
            .unwrap_or_default();
        let path = dir.join(format!("{stamp}.md"));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut title: String = initial_message
            .trim()
            .replace('\n', " ")
            .chars()
            .take(80)
            .collect();
        if title.is_empty() {
            title = format!("initiated by {initiated_by}");
        }
        writeln!(file, "# Collaboration: {title}")?;
        writeln!(file)?;
        writeln!(
            file,
            "Started: {}",
            local.format(&Rfc3339).unwrap_or_default()
        )?;
        writeln!(file, "Initiated by: {initiated_by}")?;
        writeln!(file, "Agents: claude ↔ codex")?;
        writeln!(file)?;

        Ok(ExchangeLog {
            path,
            file,
            messages_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message. Routing signals are stripped from the body; a
    /// message that was nothing but a signal is dropped.
    pub fn append_message(
        &mut self,
        source: &str,
        body: &str,
        ts: OffsetDateTime,
    ) -> Result<()> {
        let body = strip_routing_signals(body);
        if body.trim().is_empty() {
            return Ok(());
        }
        if self.messages_written > 0 {
            writeln!(self.file, "---")?;
            writeln!(self.file)?;
        }
        writeln!(self.file, "## {source} · {}", format_clock(ts))?;
        writeln!(self.file)?;
        writeln!(self.file, "{body}")?;
        writeln!(self.file)?;
        self.messages_written += 1;
        Ok(())
    }

    /// Close with the summary footer.
    pub fn close(mut self, turns: u32, stop_reason: &str) -> Result<PathBuf> {
        writeln!(self.file, "*Turns: {turns} · Stop reason: {stop_reason}*")?;
        self.file.flush()?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claodex_store::ensure_state_layout;
    use time::macros::datetime;

    #[test]
    fn transcript_has_header_messages_and_footer() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_state_layout(tmp.path()).unwrap();

        let started = datetime!(2026-03-01 14:05:00 UTC);
        let mut log =
            ExchangeLog::create(tmp.path(), "design the auth flow\nplease", "user", started)
                .unwrap();
        log.append_message("user", "design the auth flow", started).unwrap();
        log.append_message("claude", "plan A\n[COLLAB]", datetime!(2026-03-01 14:06:00 UTC))
            .unwrap();
        let path = log.close(2, "converged").unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# Collaboration: design the auth flow please"));
        assert!(content.contains("Initiated by: user"));
        assert!(content.contains("Agents: claude ↔ codex"));
        assert!(content.contains("## user ·"));
        assert!(content.contains("## claude ·"));
        assert!(content.contains("plan A"));
        assert!(!content.contains("[COLLAB]"), "signals are stripped");
        assert!(content.contains("---\n"), "messages separated by rules");
        assert!(content.ends_with("*Turns: 2 · Stop reason: converged*\n"));
    }

    #[test]
    fn signal_only_message_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_state_layout(tmp.path()).unwrap();
        let started = datetime!(2026-03-01 09:00:00 UTC);
        let mut log = ExchangeLog::create(tmp.path(), "m", "user", started).unwrap();
        log.append_message("codex", "[CONVERGED]", started).unwrap();
        let path = log.close(1, "converged").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(!content.contains("## codex"));
    }

    #[test]
    fn long_title_truncates_to_80_chars() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_state_layout(tmp.path()).unwrap();
        let long = "y".repeat(200);
        let log = ExchangeLog::create(
            tmp.path(),
            &long,
            "user",
            datetime!(2026-03-01 09:00:00 UTC),
        )
        .unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        let title_line = content.lines().next().unwrap();
        assert_eq!(title_line.len(), "# Collaboration: ".len() + 80);
    }
}
