//! Claude debug-log scan: the out-of-band Stop-event fallback source.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use claodex_core::Result;

/// The hook-dispatch line Claude Code writes when a turn stops.
const STOP_MARKER: &str = "Getting matching hook commands for Stop";

/// Leading RFC 3339 timestamp, optionally bracketed.
fn timestamp_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[?(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\]?")
            .unwrap()
    })
}

/// Scan a debug file for a Stop-event line whose timestamp is strictly
/// greater than `after`. Returns the newest such timestamp.
///
/// A missing debug file is not an error: the fallback simply has nothing to
/// say yet. Lines without a parseable timestamp prefix never match.
pub fn scan_stop_event(debug_file: &Path, after: OffsetDateTime) -> Result<Option<OffsetDateTime>> {
    if !debug_file.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(debug_file)?;
    let mut newest: Option<OffsetDateTime> = None;

    for line in content.lines() {
        if !line.contains(STOP_MARKER) {
            continue;
        }
        let Some(captures) = timestamp_prefix_pattern().captures(line.trim_start()) else {
            continue;
        };
        let Ok(timestamp) = OffsetDateTime::parse(&captures[1], &Rfc3339) else {
            continue;
        };
        if timestamp > after && newest.is_none_or(|current| timestamp > current) {
            newest = Some(timestamp);
        }
    }

    Ok(newest)
}
