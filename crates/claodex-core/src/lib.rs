//! Shared vocabulary for the claodex coordinator: the two-agent closed set,
//! protocol blocks, routing signals, and the error taxonomy.

mod agent;
mod block;
mod error;
mod signals;

pub use agent::Agent;
pub use block::{
    compose_payload, normalize_anchor, strip_injected_context, Block, RoomEvent, Source,
};
pub use error::ClaodexError;
pub use signals::{
    last_line_is, strip_routing_signals, strip_trailing_signal, COLLAB_SIGNAL, CONVERGE_SIGNAL,
};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ClaodexError>;
