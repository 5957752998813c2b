use std::path::PathBuf;
use thiserror::Error;

use crate::Agent;

/// Error taxonomy for the coordinator core.
///
/// The router surfaces these untouched; the collab orchestrator catches them
/// to run its cleanup path, and the REPL maps them to `error` bus events.
#[derive(Debug, Error)]
pub enum ClaodexError {
    /// The target's input channel is gone. Fatal to any in-flight send.
    #[error("target pane is not alive: {0}")]
    PaneDead(Agent),

    /// Turn-detection gave up: deadline hit, or a turn-end marker arrived
    /// with no extractable assistant text.
    #[error("SMOKE SIGNAL: {detail}")]
    SmokeSignal { target: Agent, detail: String },

    /// Unexpected non-meta user input appeared in the target's session log
    /// during a collab wait.
    #[error("interference: unexpected user input in {0} session during collab wait")]
    Interference(Agent),

    /// The paste primitive failed. The delivery cursor is not advanced.
    #[error("paste into {0} pane failed: {1}")]
    InjectFailed(Agent, String),

    /// A cursor write would move backward. Programming error.
    #[error("cursor cannot retreat: {}: {current} -> {requested}", .path.display())]
    CursorRetreat {
        path: PathBuf,
        current: u64,
        requested: u64,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClaodexError {
    /// Build a smoke-signal error with the standard prefix already applied
    /// by the `Display` impl.
    pub fn smoke_signal(target: Agent, detail: impl Into<String>) -> Self {
        ClaodexError::SmokeSignal {
            target,
            detail: detail.into(),
        }
    }
}
