//! Native-log extraction: maps each agent's append-only JSONL into typed
//! room events, and locates the turn-end markers the router waits on.

mod claude;
mod codex;
mod debug_log;
mod turn_end;
mod window;

pub use claude::claude_nonmeta_user_texts;
pub use debug_log::scan_stop_event;
pub use turn_end::{
    claude_assistant_after_last_user_boundary, scan_turn_end, TurnEndScan,
};
pub use window::{extract_window, ExtractionWindow};
