//! Deterministic turn-end detection over a JSONL line window.

use serde_json::Value;

use claodex_core::Agent;

use crate::claude;

/// Result of scanning one window for a turn-end marker.
#[derive(Debug, Clone, Default)]
pub struct TurnEndScan {
    /// Absolute line of the marker, when found.
    pub marker_line: Option<u64>,
    /// A codex `task_started` appeared in the window. Once seen, only a
    /// `task_complete` *after* it counts, so a stale marker from a previous
    /// turn cannot be latched.
    pub saw_codex_task_started: bool,
}

/// Scan a window `(start_line, start_line + lines.len()]` for the target's
/// turn-end marker.
pub fn scan_turn_end(target: Agent, lines: &[String], start_line: u64) -> TurnEndScan {
    match target {
        Agent::Codex => scan_codex(lines, start_line),
        Agent::Claude => scan_claude(lines, start_line),
    }
}

fn parse_row(line: &str) -> Option<Value> {
    serde_json::from_str::<Value>(line.trim())
        .ok()
        .filter(Value::is_object)
}

fn scan_codex(lines: &[String], start_line: u64) -> TurnEndScan {
    let mut saw_started = false;
    let mut first_complete_without_started: Option<u64> = None;

    for (offset, line) in lines.iter().enumerate() {
        let absolute = start_line + offset as u64 + 1;
        let Some(entry) = parse_row(line) else {
            continue;
        };
        if entry.get("type").and_then(Value::as_str) != Some("event_msg") {
            continue;
        }
        let marker = entry
            .get("payload")
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);
        match marker {
            Some("task_started") => saw_started = true,
            Some("task_complete") => {
                if saw_started {
                    return TurnEndScan {
                        marker_line: Some(absolute),
                        saw_codex_task_started: true,
                    };
                }
                if first_complete_without_started.is_none() {
                    first_complete_without_started = Some(absolute);
                }
            }
            _ => {}
        }
    }

    if saw_started {
        // a new task_started demands a task_complete after it
        return TurnEndScan {
            marker_line: None,
            saw_codex_task_started: true,
        };
    }
    TurnEndScan {
        marker_line: first_complete_without_started,
        saw_codex_task_started: false,
    }
}

fn scan_claude(lines: &[String], start_line: u64) -> TurnEndScan {
    for (offset, line) in lines.iter().enumerate() {
        let absolute = start_line + offset as u64 + 1;
        let Some(entry) = parse_row(line) else {
            continue;
        };
        if entry.get("type").and_then(Value::as_str) == Some("system")
            && entry.get("subtype").and_then(Value::as_str) == Some("turn_duration")
        {
            return TurnEndScan {
                marker_line: Some(absolute),
                saw_codex_task_started: false,
            };
        }
    }
    TurnEndScan::default()
}

/// Boundary-aware latest-assistant extraction for the claude stop-event
/// fallback.
///
/// Every `type = user, role = user` row resets the accumulator — meta and
/// tool-result-only rows included, because any of them means subsequent
/// assistant text is a new frame, not the final turn response. Returns
/// `None` when the newest assistant frame is not strictly after the latest
/// user boundary.
pub fn claude_assistant_after_last_user_boundary(lines: &[String]) -> Option<String> {
    let mut latest: Option<String> = None;

    for line in lines {
        let Some(entry) = parse_row(line) else {
            continue;
        };
        if claude::is_user_role_row(&entry) {
            latest = None;
            continue;
        }
        if claude::is_meta_row(&entry) {
            continue;
        }
        if let Some(text) = claude::assistant_text(&entry) {
            latest = Some(text);
        }
    }

    latest.map(|text| text.trim().to_string())
}
