use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::Agent;

/// Matches one injected block header, e.g. `--- claude ---`.
fn header_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^---\s*(claude|codex|user)\s*---\s*$").unwrap())
}

/// Who a protocol block speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    User,
    Agent(Agent),
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Agent(agent) => agent.as_str(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed record extracted from one agent's session log. Ordering follows
/// the source file; per turn only the last non-empty assistant text survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    UserText(String),
    AssistantText(String),
}

impl RoomEvent {
    pub fn body(&self) -> &str {
        match self {
            RoomEvent::UserText(text) | RoomEvent::AssistantText(text) => text,
        }
    }
}

/// One rendered section of a composed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub source: Source,
    pub body: String,
}

impl Block {
    pub fn user(body: impl Into<String>) -> Self {
        Block {
            source: Source::User,
            body: body.into(),
        }
    }

    pub fn agent(agent: Agent, body: impl Into<String>) -> Self {
        Block {
            source: Source::Agent(agent),
            body: body.into(),
        }
    }

    /// Render as a headered section.
    pub fn render(&self) -> String {
        format!("--- {} ---\n{}", self.source, self.body.trim())
    }
}

/// Render an ordered block list as one payload, blocks separated by a blank
/// line.
pub fn compose_payload(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collapse all whitespace runs to single spaces. Used to compare an
/// expected anchor against the echo an agent writes back to its own log.
pub fn normalize_anchor(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip nested claodex header blocks from a forwarded user message.
///
/// When a user row begins with an injected-header structure, the text is a
/// payload this coordinator pasted earlier. Only a trailing `--- user ---`
/// block is a real instruction; everything before it is previously injected
/// context. A payload that ends in an agent block (a routed turn) carries no
/// user instruction at all and reduces to nothing, so routed echoes never
/// re-enter the room. Text that does not follow block shape passes through
/// unchanged.
pub fn strip_injected_context(message: &str) -> String {
    let text = message.trim();
    if !text.starts_with("---") {
        return message.to_string();
    }

    let mut blocks: Vec<(String, Vec<&str>)> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(captures) = header_line_pattern().captures(line.trim()) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some((captures[1].to_string(), Vec::new()));
            continue;
        }
        match current.as_mut() {
            Some((_, body)) => body.push(line),
            // text before the first header: not block-shaped after all
            None => return message.to_string(),
        }
    }

    let Some((source, body_lines)) = current else {
        return message.to_string();
    };

    if source != "user" {
        return String::new();
    }
    body_lines.join("\n").trim().to_string()
}
