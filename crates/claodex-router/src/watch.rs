//! Pending-watch bookkeeping: the router's record that a target owes a
//! response.

use time::OffsetDateTime;

use claodex_core::{normalize_anchor, Agent, Block, Source};

/// One outstanding expectation that `target` will respond.
///
/// `anchor_cursor` is the target's read cursor at send time: the lower bound
/// of every turn-end scan for this watch. `anchor_text` is the normalized
/// final `--- user ---` block of the composed payload (absent for a pure
/// routed turn); `payload_norm` is the whole rendered payload normalized, so
/// the echo the target writes back to its own log can be recognized either
/// way.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub target: Agent,
    pub sent_at: OffsetDateTime,
    pub anchor_cursor: u64,
    pub anchor_text: Option<String>,
    pub payload_norm: String,
    pub blocks: Vec<Block>,
}

impl PendingSend {
    pub fn new(
        target: Agent,
        anchor_cursor: u64,
        blocks: Vec<Block>,
        rendered_payload: &str,
    ) -> Self {
        let anchor_text = blocks
            .iter()
            .rev()
            .find(|block| block.source == Source::User)
            .map(|block| normalize_anchor(&block.body));
        PendingSend {
            target,
            sent_at: OffsetDateTime::now_utc(),
            anchor_cursor,
            anchor_text,
            payload_norm: normalize_anchor(rendered_payload),
            blocks,
        }
    }

    /// Fold a superseded watch into this one: the earliest send time wins
    /// and the block history concatenates, preserving exchange-log fidelity.
    pub fn absorb_replaced(&mut self, previous: PendingSend) {
        if previous.sent_at < self.sent_at {
            self.sent_at = previous.sent_at;
        }
        let mut blocks = previous.blocks;
        blocks.extend(self.blocks.drain(..));
        self.blocks = blocks;
    }

    /// True when a user-role row in the target's log is the echo of this
    /// send rather than fresh input.
    pub fn is_echo(&self, row_text: &str) -> bool {
        let normalized = normalize_anchor(row_text);
        if normalized == self.payload_norm {
            return true;
        }
        match &self.anchor_text {
            Some(anchor) => normalized == *anchor,
            None => false,
        }
    }
}

/// One completed response turn from an agent.
#[derive(Debug, Clone)]
pub struct ResponseTurn {
    pub agent: Agent,
    pub text: String,
    /// Line in the agent's log at which completion was established.
    pub source_cursor: u64,
    pub detected_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn watch(target: Agent, blocks: Vec<Block>) -> PendingSend {
        let payload = claodex_core::compose_payload(&blocks);
        PendingSend::new(target, 0, blocks, &payload)
    }

    #[test]
    fn anchor_is_last_user_block() {
        let pending = watch(
            Agent::Claude,
            vec![
                Block::user("first"),
                Block::agent(Agent::Codex, "response"),
                Block::user("  second   message "),
            ],
        );
        assert_eq!(pending.anchor_text.as_deref(), Some("second message"));
    }

    #[test]
    fn routed_only_payload_has_no_anchor() {
        let pending = watch(Agent::Claude, vec![Block::agent(Agent::Codex, "response")]);
        assert!(pending.anchor_text.is_none());
    }

    #[test]
    fn absorb_keeps_earliest_sent_at_and_concatenates_blocks() {
        let mut old = watch(Agent::Claude, vec![Block::user("first")]);
        old.sent_at = datetime!(2026-03-01 09:00:00 UTC);
        let mut new = watch(Agent::Claude, vec![Block::user("second")]);
        new.sent_at = datetime!(2026-03-01 09:00:10 UTC);

        new.absorb_replaced(old);
        assert_eq!(new.sent_at, datetime!(2026-03-01 09:00:00 UTC));
        assert_eq!(new.blocks.len(), 2);
        assert_eq!(new.blocks[0].body, "first");
        assert_eq!(new.blocks[1].body, "second");
    }

    #[test]
    fn echo_matches_anchor_or_full_payload() {
        let pending = watch(
            Agent::Claude,
            vec![Block::agent(Agent::Codex, "ctx"), Block::user("do it")],
        );
        // the target may echo the trailing user block...
        assert!(pending.is_echo("do  it"));
        // ...or the entire rendered payload
        assert!(pending.is_echo("--- codex ---\nctx\n\n--- user ---\ndo it"));
        assert!(!pending.is_echo("something else entirely"));
    }
}
