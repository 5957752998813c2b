//! Claude session-log row classification and room-event extraction.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use claodex_core::RoomEvent;

/// Skill-wrapper tags Claude Code wraps around slash-command submissions.
fn command_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<(command-message|command-name|command-args)>(.*?)</(command-message|command-name|command-args)>")
            .unwrap()
    })
}

/// Leading command prefixes stripped from user text so the coordinator's own
/// trigger command never routes as a message.
const COMMAND_PREFIXES: [&str; 2] = ["/claodex", "$claodex"];

/// True for sidechain or meta rows (system reminders, task notifications,
/// and other host plumbing carry the meta flag).
pub(crate) fn is_meta_row(entry: &Value) -> bool {
    entry.get("isSidechain").and_then(Value::as_bool).unwrap_or(false)
        || entry.get("isMeta").and_then(Value::as_bool).unwrap_or(false)
}

/// True when a user message contains only `tool_result` blocks.
pub(crate) fn is_tool_result_only(message: &Value) -> bool {
    let Some(content) = message.get("content").and_then(Value::as_array) else {
        return false;
    };
    !content.is_empty()
        && content.iter().all(|block| {
            block.get("type").and_then(Value::as_str) == Some("tool_result")
        })
}

/// True for `type = user, role = user` rows regardless of meta status.
/// Every such row is an assistant-frame boundary for the stop-event
/// fallback, meta and tool-result rows included.
pub(crate) fn is_user_role_row(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("user")
        && entry
            .get("message")
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
            == Some("user")
}

fn is_assistant_role_row(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("assistant")
        && entry
            .get("message")
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
            == Some("assistant")
}

/// Join `text` blocks from a message content payload; plain strings pass
/// through.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => {
            let fragments: Vec<&str> = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            fragments.join("\n")
        }
        _ => String::new(),
    }
}

/// Assistant text for one row: joined `text` blocks only; tool calls and
/// thinking blocks are not text.
pub(crate) fn assistant_text(entry: &Value) -> Option<String> {
    if !is_assistant_role_row(entry) {
        return None;
    }
    let content = entry.get("message").and_then(|m| m.get("content"));
    if !matches!(content, Some(Value::Array(_))) {
        return None;
    }
    let text = content_text(content);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub(crate) fn strip_command_prefix(text: &str) -> String {
    let stripped = text.trim_start();
    for prefix in COMMAND_PREFIXES {
        if stripped == prefix {
            return String::new();
        }
        if let Some(rest) = stripped.strip_prefix(prefix) {
            if rest.starts_with(' ') {
                return rest.trim_start().to_string();
            }
        }
    }
    text.to_string()
}

/// Normalize skill-wrapper command tags into plain user text.
///
/// A submission like `<command-name>/x</command-name><command-args>y</command-args>`
/// reduces to the args; free text outside the tags wins over all of them.
fn normalize_user_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let pattern = command_tag_pattern();
    if !pattern.is_match(text) {
        return strip_command_prefix(text);
    }

    let outside = pattern.replace_all(text, "");
    if !outside.trim().is_empty() {
        return strip_command_prefix(text);
    }

    let mut by_tag: [Option<String>; 3] = [None, None, None];
    for captures in pattern.captures_iter(text) {
        let body = captures[2].trim();
        if body.is_empty() {
            continue;
        }
        let slot = match &captures[1] {
            "command-args" => 0,
            "command-name" => 1,
            _ => 2,
        };
        by_tag[slot] = Some(body.to_string());
    }
    for tag in by_tag.into_iter().flatten() {
        return strip_command_prefix(&tag);
    }
    strip_command_prefix(text)
}

/// User text for one non-meta user row, normalized. `None` when the row is
/// meta, tool plumbing, or empty after normalization.
pub(crate) fn user_text(entry: &Value) -> Option<String> {
    if is_meta_row(entry) || !is_user_role_row(entry) {
        return None;
    }
    let message = entry.get("message")?;
    if is_tool_result_only(message) {
        return None;
    }
    let text = normalize_user_text(&content_text(message.get("content")));
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract room events from parsed Claude rows, in source order. Per turn,
/// the last non-empty assistant frame wins; user rows flush it.
pub(crate) fn extract_events(entries: &[Value]) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    let mut pending_assistant: Option<String> = None;

    for entry in entries {
        if is_meta_row(entry) {
            continue;
        }

        if is_user_role_row(entry) {
            let message = entry.get("message").cloned().unwrap_or(Value::Null);
            if is_tool_result_only(&message) {
                continue;
            }
            // user rows bound assistant turns even when their text is empty
            if let Some(text) = pending_assistant.take() {
                events.push(RoomEvent::AssistantText(text));
            }
            let text = normalize_user_text(&content_text(message.get("content")));
            if !text.trim().is_empty() {
                events.push(RoomEvent::UserText(text));
            }
            continue;
        }

        if let Some(text) = assistant_text(entry) {
            pending_assistant = Some(text);
        }
    }

    if let Some(text) = pending_assistant {
        events.push(RoomEvent::AssistantText(text));
    }
    events
}

/// Non-meta user texts in a raw line window, normalized. Used by the router
/// to spot interference during a collab wait.
pub fn claude_nonmeta_user_texts(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|entry| user_text(&entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn user_then_assistant_extracts_both() {
        let entries = vec![
            row(r#"{"type":"user","message":{"role":"user","content":"hello"}}"#),
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#),
        ];
        assert_eq!(
            extract_events(&entries),
            vec![
                RoomEvent::UserText("hello".into()),
                RoomEvent::AssistantText("hi".into()),
            ]
        );
    }

    #[test]
    fn last_assistant_frame_per_turn_wins() {
        let entries = vec![
            row(r#"{"type":"user","message":{"role":"user","content":"go"}}"#),
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"let me check"}]}}"#),
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"final answer"}]}}"#),
        ];
        let events = extract_events(&entries);
        assert_eq!(
            events,
            vec![
                RoomEvent::UserText("go".into()),
                RoomEvent::AssistantText("final answer".into()),
            ]
        );
    }

    #[test]
    fn user_boundary_flushes_previous_turn() {
        let entries = vec![
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"turn one"}]}}"#),
            row(r#"{"type":"user","message":{"role":"user","content":"next"}}"#),
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"turn two"}]}}"#),
        ];
        assert_eq!(
            extract_events(&entries),
            vec![
                RoomEvent::AssistantText("turn one".into()),
                RoomEvent::UserText("next".into()),
                RoomEvent::AssistantText("turn two".into()),
            ]
        );
    }

    #[test]
    fn meta_and_sidechain_rows_are_skipped() {
        let entries = vec![
            row(r#"{"type":"user","isMeta":true,"message":{"role":"user","content":"reminder"}}"#),
            row(r#"{"type":"assistant","isSidechain":true,"message":{"role":"assistant","content":[{"type":"text","text":"subagent"}]}}"#),
        ];
        assert!(extract_events(&entries).is_empty());
    }

    #[test]
    fn tool_result_only_user_rows_do_not_flush() {
        // tool-result rows sit between assistant frames of one turn
        let entries = vec![
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"pre-tool"}]}}"#),
            row(r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","content":"ok"}]}}"#),
            row(r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"post-tool"}]}}"#),
        ];
        assert_eq!(
            extract_events(&entries),
            vec![RoomEvent::AssistantText("post-tool".into())]
        );
    }

    #[test]
    fn tool_use_blocks_are_not_text() {
        let entries = vec![row(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Bash"}]}}"#,
        )];
        assert!(extract_events(&entries).is_empty());
    }

    #[test]
    fn command_tags_reduce_to_args() {
        let text = "<command-name>/claodex</command-name><command-args>send this</command-args>";
        assert_eq!(normalize_user_text(text), "send this");
    }

    #[test]
    fn command_tags_with_outside_text_keep_everything() {
        let text = "context <command-name>/x</command-name>";
        assert_eq!(normalize_user_text(text), text);
    }

    #[test]
    fn command_prefix_is_stripped() {
        assert_eq!(normalize_user_text("/claodex hello there"), "hello there");
        assert_eq!(normalize_user_text("/claodex"), "");
        assert_eq!(normalize_user_text("/claodexnot a command"), "/claodexnot a command");
    }

    #[test]
    fn nonmeta_user_texts_skip_meta_and_tool_rows() {
        let lines = vec![
            r#"{"type":"user","message":{"role":"user","content":"typed by a human"}}"#.to_string(),
            r#"{"type":"user","isMeta":true,"message":{"role":"user","content":"reminder"}}"#.to_string(),
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","content":"x"}]}}"#.to_string(),
            "not json at all".to_string(),
        ];
        assert_eq!(claude_nonmeta_user_texts(&lines), vec!["typed by a human"]);
    }
}
