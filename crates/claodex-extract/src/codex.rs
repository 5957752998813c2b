//! Codex session-log row classification and room-event extraction.

use serde_json::Value;

use claodex_core::RoomEvent;

use crate::claude::strip_command_prefix;

fn payload(entry: &Value) -> Option<&Value> {
    entry.get("payload").filter(|p| p.is_object())
}

fn is_user_message(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("event_msg")
        && payload(entry)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            == Some("user_message")
}

fn is_assistant_message(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("response_item")
        && payload(entry).is_some_and(|p| {
            p.get("type").and_then(Value::as_str) == Some("message")
                && p.get("role").and_then(Value::as_str) == Some("assistant")
        })
}

/// True when a user payload carries both `message` and `content` text; the
/// extractor prefers `message` and warns once per window.
fn has_ambiguous_user_payload(payload: &Value) -> bool {
    payload.get("message").and_then(Value::as_str).is_some()
        && matches!(
            payload.get("content"),
            Some(Value::String(_)) | Some(Value::Array(_))
        )
}

fn joined_content_text(content: Option<&Value>) -> Option<String> {
    if let Some(Value::Array(blocks)) = content {
        let parts: Vec<&str> = blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("\n"));
        }
    }
    None
}

fn user_message_text(payload: &Value) -> String {
    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        return strip_command_prefix(message);
    }
    if let Some(joined) = joined_content_text(payload.get("content")) {
        return strip_command_prefix(&joined);
    }
    if let Some(content) = payload.get("content").and_then(Value::as_str) {
        return strip_command_prefix(content);
    }
    String::new()
}

fn assistant_message_text(payload: &Value) -> String {
    if let Some(joined) = joined_content_text(payload.get("content")) {
        return joined;
    }
    payload
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extract room events from parsed Codex rows, in source order. Per turn,
/// the last non-empty assistant message wins; user messages flush it.
pub(crate) fn extract_events(entries: &[Value]) -> (Vec<RoomEvent>, Vec<String>) {
    let mut events = Vec::new();
    let mut warnings = Vec::new();
    let mut pending_assistant: Option<String> = None;
    let mut warned_ambiguous = false;

    for entry in entries {
        if is_user_message(entry) {
            let payload = payload(entry).expect("user_message rows carry a payload");
            if has_ambiguous_user_payload(payload) && !warned_ambiguous {
                warnings.push(
                    "warning: codex user_message payload contains both message and content; \
                     preferring message"
                        .to_string(),
                );
                warned_ambiguous = true;
            }
            // user messages bound assistant turns even when their text is empty
            if let Some(text) = pending_assistant.take() {
                events.push(RoomEvent::AssistantText(text));
            }
            let text = user_message_text(payload);
            if !text.trim().is_empty() {
                events.push(RoomEvent::UserText(text));
            }
            continue;
        }

        if is_assistant_message(entry) {
            let text = assistant_message_text(payload(entry).expect("checked above"));
            if !text.trim().is_empty() {
                pending_assistant = Some(text);
            }
        }
    }

    if let Some(text) = pending_assistant {
        events.push(RoomEvent::AssistantText(text));
    }
    (events, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn user_and_assistant_round_trip() {
        let entries = vec![
            row(r#"{"type":"event_msg","payload":{"type":"user_message","message":"hello"}}"#),
            row(r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"hi"}]}}"#),
        ];
        let (events, warnings) = extract_events(&entries);
        assert!(warnings.is_empty());
        assert_eq!(
            events,
            vec![
                RoomEvent::UserText("hello".into()),
                RoomEvent::AssistantText("hi".into()),
            ]
        );
    }

    #[test]
    fn last_assistant_message_per_turn_wins() {
        let entries = vec![
            row(r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"text":"draft"}]}}"#),
            row(r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"text":"final"}]}}"#),
        ];
        let (events, _) = extract_events(&entries);
        assert_eq!(events, vec![RoomEvent::AssistantText("final".into())]);
    }

    #[test]
    fn user_message_flushes_pending_assistant() {
        let entries = vec![
            row(r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"text":"turn one"}]}}"#),
            row(r#"{"type":"event_msg","payload":{"type":"user_message","message":"next"}}"#),
            row(r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"text":"turn two"}]}}"#),
        ];
        let (events, _) = extract_events(&entries);
        assert_eq!(
            events,
            vec![
                RoomEvent::AssistantText("turn one".into()),
                RoomEvent::UserText("next".into()),
                RoomEvent::AssistantText("turn two".into()),
            ]
        );
    }

    #[test]
    fn lifecycle_rows_are_not_events() {
        let entries = vec![
            row(r#"{"type":"event_msg","payload":{"type":"task_started"}}"#),
            row(r#"{"type":"event_msg","payload":{"type":"task_complete"}}"#),
            row(r#"{"type":"response_item","payload":{"type":"function_call","name":"shell"}}"#),
        ];
        let (events, _) = extract_events(&entries);
        assert!(events.is_empty());
    }

    #[test]
    fn ambiguous_user_payload_warns_once_and_prefers_message() {
        let raw = r#"{"type":"event_msg","payload":{"type":"user_message","message":"primary","content":"secondary"}}"#;
        let entries = vec![row(raw), row(raw)];
        let (events, warnings) = extract_events(&entries);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            events,
            vec![
                RoomEvent::UserText("primary".into()),
                RoomEvent::UserText("primary".into()),
            ]
        );
    }

    #[test]
    fn assistant_text_fallback_field() {
        let entries = vec![row(
            r#"{"type":"response_item","payload":{"type":"message","role":"assistant","text":"bare text"}}"#,
        )];
        let (events, _) = extract_events(&entries);
        assert_eq!(events, vec![RoomEvent::AssistantText("bare text".into())]);
    }
}
