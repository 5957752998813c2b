//! Window extraction over a JSONL delta: parse rows, defer a partial tail,
//! and hand the valid prefix to the per-agent extractors.

use serde_json::Value;

use claodex_core::{strip_injected_context, Agent, RoomEvent};

use crate::{claude, codex};

/// Result of extracting one line window.
#[derive(Debug, Clone)]
pub struct ExtractionWindow {
    /// Room events for the parsed prefix, in source order.
    pub events: Vec<RoomEvent>,
    /// Absolute line number of the last successfully parsed row. The read
    /// cursor must not advance past it.
    pub last_success_line: u64,
    /// Non-fatal parser warnings.
    pub warnings: Vec<String>,
}

/// Extract room events from a raw line window starting just past
/// `start_line` (the current read cursor).
///
/// A malformed final line is *deferred*, not skipped: `last_success_line`
/// stops short of it so the next refresh retries once the agent finishes the
/// write. Malformed rows strictly before the last good row can never become
/// valid and are skipped with a warning.
pub fn extract_window(source: Agent, lines: &[String], start_line: u64) -> ExtractionWindow {
    let parsed: Vec<Option<Value>> = lines
        .iter()
        .map(|line| {
            serde_json::from_str::<Value>(line)
                .ok()
                .filter(Value::is_object)
        })
        .collect();

    let last_success_relative = parsed
        .iter()
        .rposition(|entry| entry.is_some())
        .map(|index| index as u64 + 1)
        .unwrap_or(0);

    let mut warnings = Vec::new();
    let mut valid = Vec::new();
    for (index, entry) in parsed.into_iter().enumerate() {
        let relative = index as u64 + 1;
        let absolute = start_line + relative;
        match entry {
            Some(value) => {
                if relative > last_success_relative {
                    break;
                }
                valid.push(value);
            }
            None => {
                if relative < last_success_relative {
                    warnings.push(format!(
                        "warning: malformed {source} log entry at line {absolute}"
                    ));
                } else {
                    warnings.push(format!(
                        "warning: malformed {source} log tail entry at line {absolute}; deferring"
                    ));
                    break;
                }
            }
        }
    }

    let (raw_events, codex_warnings) = match source {
        Agent::Claude => (claude::extract_events(&valid), Vec::new()),
        Agent::Codex => codex::extract_events(&valid),
    };
    warnings.extend(codex_warnings);

    // header hygiene: a forwarded user row whose body is a previously
    // injected payload reduces to its trailing user block
    let events = raw_events
        .into_iter()
        .filter_map(|event| match event {
            RoomEvent::UserText(text) => {
                let stripped = strip_injected_context(&text);
                let trimmed = stripped.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(RoomEvent::UserText(trimmed.to_string()))
                }
            }
            RoomEvent::AssistantText(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(RoomEvent::AssistantText(trimmed.to_string()))
                }
            }
        })
        .collect();

    ExtractionWindow {
        events,
        last_success_line: start_line + last_success_relative,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clean_window_advances_to_end() {
        let window = extract_window(
            Agent::Claude,
            &lines(&[
                r#"{"type":"user","message":{"role":"user","content":"hello"}}"#,
                r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#,
            ]),
            10,
        );
        assert_eq!(window.last_success_line, 12);
        assert_eq!(window.events.len(), 2);
        assert!(window.warnings.is_empty());
    }

    #[test]
    fn partial_tail_is_deferred() {
        let window = extract_window(
            Agent::Claude,
            &lines(&[
                r#"{"type":"user","message":{"role":"user","content":"hello"}}"#,
                r#"{"type":"assistant","mess"#,
            ]),
            0,
        );
        // cursor stops before the torn line so it is retried next refresh
        assert_eq!(window.last_success_line, 1);
        assert_eq!(window.events, vec![RoomEvent::UserText("hello".into())]);
        assert_eq!(window.warnings.len(), 1);
        assert!(window.warnings[0].contains("deferring"));
    }

    #[test]
    fn malformed_interior_line_is_skipped_with_warning() {
        let window = extract_window(
            Agent::Codex,
            &lines(&[
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"one"}}"#,
                "garbage",
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"two"}}"#,
            ]),
            5,
        );
        assert_eq!(window.last_success_line, 8);
        assert_eq!(window.events.len(), 2);
        assert_eq!(window.warnings.len(), 1);
        assert!(window.warnings[0].contains("line 7"));
    }

    #[test]
    fn all_malformed_window_does_not_advance() {
        let window = extract_window(Agent::Claude, &lines(&["nope"]), 3);
        assert_eq!(window.last_success_line, 3);
        assert!(window.events.is_empty());
    }

    #[test]
    fn forwarded_payload_reduces_to_user_block() {
        let forwarded =
            "--- codex ---\\nolder response\\n\\n--- user ---\\nthe actual instruction";
        let raw = format!(
            r#"{{"type":"user","message":{{"role":"user","content":"{forwarded}"}}}}"#
        );
        let window = extract_window(Agent::Claude, &lines(&[&raw]), 0);
        assert_eq!(
            window.events,
            vec![RoomEvent::UserText("the actual instruction".into())]
        );
    }
}
