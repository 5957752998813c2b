//! Cursor-tracked delta delivery: composes undelivered peer context into
//! outbound payloads, injects them, and tracks the response each target owes.

mod wait;
mod watch;

pub use watch::{PendingSend, ResponseTurn};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use claodex_core::{
    compose_payload, normalize_anchor, Agent, Block, ClaodexError, Result, RoomEvent, Source,
};
use claodex_extract::extract_window;
use claodex_store::{
    count_lines, read_delivery_cursor, read_lines_between, read_read_cursor,
    write_delivery_cursor, write_read_cursor, SessionParticipants,
};

/// Consecutive parse failures before a stuck line is skipped.
const STUCK_SKIP_ATTEMPTS: u32 = 3;
/// Wall-clock ceiling before a stuck line is skipped.
const STUCK_SKIP_SECONDS: u64 = 10;

/// Content-injection seam. The injector must deliver the whole payload plus
/// a submit keystroke, or fail without partial effects.
pub trait Injector {
    fn paste(&self, pane_handle: &str, payload: &str) -> std::result::Result<(), String>;
    fn pane_alive(&self, pane_handle: &str) -> bool;
}

/// Runtime tuning for routing behavior.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub poll_interval: Duration,
    pub turn_timeout: Duration,
    /// Directory of claude debug logs (`{dir}/{session_id}.txt`), the
    /// stop-event fallback source.
    pub claude_debug_dir: PathBuf,
}

struct StuckCursor {
    line: u64,
    attempts: u32,
    started_at: Instant,
}

/// Coordinates event extraction, delta composition, and message delivery.
/// Exposes no UI: warnings go through the callback, failures are typed
/// errors.
pub struct Router<I: Injector> {
    workspace_root: PathBuf,
    participants: SessionParticipants,
    injector: I,
    config: RoutingConfig,
    on_warning: Box<dyn Fn(&str)>,
    stuck: HashMap<Agent, StuckCursor>,
    watches: HashMap<Agent, PendingSend>,
    /// Stop-event latches, keyed by `(target, anchor_cursor)`: the Stop was
    /// observed but the assistant text had not flushed yet.
    stop_latches: HashMap<(Agent, u64), time::OffsetDateTime>,
}

impl<I: Injector> Router<I> {
    pub fn new(
        workspace_root: &Path,
        participants: SessionParticipants,
        injector: I,
        config: RoutingConfig,
        on_warning: Box<dyn Fn(&str)>,
    ) -> Self {
        Router {
            workspace_root: workspace_root.to_path_buf(),
            participants,
            injector,
            config,
            on_warning,
            stuck: HashMap::new(),
            watches: HashMap::new(),
            stop_latches: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn participants(&self) -> &SessionParticipants {
        &self.participants
    }

    // ── Source refresh ──

    /// Advance a source read cursor by parsing newly appended lines.
    ///
    /// A malformed tail defers the cursor (partial write in progress); the
    /// same line stuck for `STUCK_SKIP_ATTEMPTS` refreshes or
    /// `STUCK_SKIP_SECONDS` is skipped with a warning so one torn line
    /// cannot wedge the stream.
    pub fn refresh_source(&mut self, source: Agent) -> Result<u64> {
        if self
            .participants
            .refresh_if_reregistered(&self.workspace_root, source)?
        {
            (self.on_warning)(&format!(
                "{source} re-registered; following new session file"
            ));
        }
        let session_file = self.participants.for_agent(source).session_file.clone();

        let cursor = read_read_cursor(&self.workspace_root, source)?;
        let line_count = count_lines(&session_file)?;
        if cursor > line_count {
            return Err(ClaodexError::Validation(format!(
                "read cursor {cursor} exceeds {source} session length {line_count}"
            )));
        }
        if cursor == line_count {
            self.stuck.remove(&source);
            return Ok(cursor);
        }

        let lines = read_lines_between(&session_file, cursor, Some(line_count))?;
        let window = extract_window(source, &lines, cursor);
        let next_cursor = window.last_success_line;

        if next_cursor == cursor {
            let now = Instant::now();
            let state = self.stuck.entry(source).or_insert(StuckCursor {
                line: cursor,
                attempts: 0,
                started_at: now,
            });
            if state.line != cursor {
                state.line = cursor;
                state.attempts = 0;
                state.started_at = now;
            }
            state.attempts += 1;

            let elapsed = now.duration_since(state.started_at);
            if state.attempts >= STUCK_SKIP_ATTEMPTS
                || elapsed >= Duration::from_secs(STUCK_SKIP_SECONDS)
            {
                let skipped = (cursor + 1).min(line_count);
                write_read_cursor(&self.workspace_root, source, skipped)?;
                self.stuck.remove(&source);
                (self.on_warning)(&format!(
                    "skipped malformed {source} log line at {} after repeated parse failures",
                    cursor + 1
                ));
                return Ok(skipped);
            }
            return Ok(cursor);
        }

        write_read_cursor(&self.workspace_root, source, next_cursor)?;
        self.stuck.remove(&source);
        for warning in &window.warnings {
            (self.on_warning)(warning);
        }
        Ok(next_cursor)
    }

    /// Room events in `(start_line, end_line]` of one source log.
    pub fn events_between(
        &self,
        source: Agent,
        start_line: u64,
        end_line: u64,
    ) -> Result<Vec<RoomEvent>> {
        let session_file = &self.participants.for_agent(source).session_file;
        let lines = read_lines_between(session_file, start_line, Some(end_line))?;
        Ok(extract_window(source, &lines, start_line).events)
    }

    pub(crate) fn latest_assistant_between(
        &self,
        source: Agent,
        start_line: u64,
        end_line: u64,
    ) -> Result<Option<String>> {
        let events = self.events_between(source, start_line, end_line)?;
        Ok(events.into_iter().rev().find_map(|event| match event {
            RoomEvent::AssistantText(text) => Some(text),
            RoomEvent::UserText(_) => None,
        }))
    }

    // ── Delta composition ──

    /// Compose the undelivered peer delta for a target.
    ///
    /// Returns the block list plus the proposed delivery cursor (the peer's
    /// refreshed read cursor). With `echoed_anchor`, the first user block
    /// matching the anchor is dropped: it is the target-bound echo of a
    /// payload this coordinator already delivered, not a new message.
    pub fn build_delta_for_target(
        &mut self,
        target: Agent,
        echoed_anchor: Option<&str>,
    ) -> Result<(Vec<Block>, u64)> {
        let source = target.peer();
        let peer_read_cursor = self.refresh_source(source)?;
        let delivery_cursor = read_delivery_cursor(&self.workspace_root, target)?;
        if delivery_cursor > peer_read_cursor {
            return Err(ClaodexError::Validation(format!(
                "delivery cursor {delivery_cursor} exceeds peer read cursor {peer_read_cursor} for {target}"
            )));
        }
        if delivery_cursor == peer_read_cursor {
            return Ok((Vec::new(), peer_read_cursor));
        }

        let events = self.events_between(source, delivery_cursor, peer_read_cursor)?;
        let mut blocks = Vec::with_capacity(events.len());
        let mut echo_pending = echoed_anchor.map(normalize_anchor);
        for event in events {
            match event {
                RoomEvent::UserText(text) => {
                    if let Some(anchor) = &echo_pending {
                        if normalize_anchor(&text) == *anchor {
                            // first match only; later equals are real repeats
                            echo_pending = None;
                            continue;
                        }
                    }
                    blocks.push(Block::user(text));
                }
                RoomEvent::AssistantText(text) => blocks.push(Block::agent(source, text)),
            }
        }
        Ok((blocks, peer_read_cursor))
    }

    // ── Sends ──

    /// Send one user message in normal mode: peer delta first, the user's
    /// text as the trailing block.
    pub fn send_user_message(&mut self, target: Agent, user_text: &str) -> Result<Vec<Block>> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(ClaodexError::Validation(
                "message cannot be empty".to_string(),
            ));
        }

        let anchor_cursor = self.refresh_source(target)?;
        let (mut blocks, delta_cursor) = self.build_delta_for_target(target, None)?;
        blocks.push(Block::user(user_text));

        self.deliver(target, &blocks, delta_cursor)?;
        self.register_watch(PendingSend::new(
            target,
            anchor_cursor,
            blocks.clone(),
            &compose_payload(&blocks),
        ));
        Ok(blocks)
    }

    /// Route one agent's response to its peer: delta (minus the source's
    /// own assistant text, already conveyed by `response_text`), then any
    /// user interjections in chronological order, then the response.
    pub fn send_routed_message(
        &mut self,
        target: Agent,
        source_agent: Agent,
        response_text: &str,
        interjections: &[String],
        echoed_anchor: Option<&str>,
    ) -> Result<Vec<Block>> {
        let response_text = response_text.trim();
        if response_text.is_empty() {
            return Err(ClaodexError::Validation(
                "routed response cannot be empty".to_string(),
            ));
        }

        let anchor_cursor = self.refresh_source(target)?;
        let (delta, delta_cursor) = self.build_delta_for_target(target, echoed_anchor)?;
        let mut blocks: Vec<Block> = delta
            .into_iter()
            .filter(|block| block.source != Source::Agent(source_agent))
            .collect();
        for interjection in interjections {
            blocks.push(Block::user(interjection.clone()));
        }
        blocks.push(Block::agent(source_agent, response_text));

        self.deliver(target, &blocks, delta_cursor)?;
        self.register_watch(PendingSend::new(
            target,
            anchor_cursor,
            blocks.clone(),
            &compose_payload(&blocks),
        ));
        Ok(blocks)
    }

    fn deliver(&mut self, target: Agent, blocks: &[Block], delta_cursor: u64) -> Result<()> {
        let pane_handle = self.participants.for_agent(target).pane_handle.clone();
        if !self.injector.pane_alive(&pane_handle) {
            return Err(ClaodexError::PaneDead(target));
        }
        self.injector
            .paste(&pane_handle, &compose_payload(blocks))
            .map_err(|detail| ClaodexError::InjectFailed(target, detail))?;
        // only a successful paste advances delivery
        write_delivery_cursor(&self.workspace_root, target, delta_cursor)?;
        Ok(())
    }

    // ── Watch bookkeeping ──

    fn register_watch(&mut self, mut pending: PendingSend) {
        if let Some(previous) = self.watches.remove(&pending.target) {
            self.clear_latch(pending.target, previous.anchor_cursor);
            pending.absorb_replaced(previous);
        }
        self.watches.insert(pending.target, pending);
    }

    pub fn watch(&self, target: Agent) -> Option<&PendingSend> {
        self.watches.get(&target)
    }

    pub fn watched_targets(&self) -> Vec<Agent> {
        Agent::ALL
            .into_iter()
            .filter(|agent| self.watches.contains_key(agent))
            .collect()
    }

    /// Drop the watch for a target along with any stop latch it holds.
    pub fn clear_watch(&mut self, target: Agent) -> Option<PendingSend> {
        let pending = self.watches.remove(&target);
        if let Some(pending) = &pending {
            self.clear_latch(target, pending.anchor_cursor);
        }
        pending
    }

    pub fn clear_all_watches(&mut self) {
        for agent in Agent::ALL {
            self.clear_watch(agent);
        }
    }

    pub(crate) fn clear_latch(&mut self, target: Agent, anchor_cursor: u64) {
        self.stop_latches.remove(&(target, anchor_cursor));
    }

    pub(crate) fn latch(&self, target: Agent, anchor_cursor: u64) -> Option<time::OffsetDateTime> {
        self.stop_latches.get(&(target, anchor_cursor)).copied()
    }

    pub(crate) fn set_latch(
        &mut self,
        target: Agent,
        anchor_cursor: u64,
        detected_at: time::OffsetDateTime,
    ) {
        self.stop_latches.insert((target, anchor_cursor), detected_at);
    }

    pub(crate) fn pane_alive(&self, target: Agent) -> bool {
        self.injector
            .pane_alive(&self.participants.for_agent(target).pane_handle)
    }

    // ── Cursor synchronization ──

    /// Set `delivery[target] = read[peer(target)]` for each listed target,
    /// refreshing the peer first so trailing unrouted content is absorbed.
    /// Used on collab termination; a selective scope keeps an unrouted
    /// response deliverable as future delta.
    pub fn sync_delivery_cursors(&mut self, targets: &[Agent]) -> Result<()> {
        for &target in targets {
            let peer_read = self.refresh_source(target.peer())?;
            write_delivery_cursor(&self.workspace_root, target, peer_read)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::rc::Rc;

    use claodex_store::{
        ensure_state_layout, initialize_cursors_from_line_counts, participant_file,
    };

    #[derive(Clone, Default)]
    pub struct MockInjector {
        pub pastes: Rc<RefCell<Vec<(String, String)>>>,
        pub dead: Rc<Cell<bool>>,
        pub fail_paste: Rc<Cell<bool>>,
    }

    impl Injector for MockInjector {
        fn paste(&self, pane_handle: &str, payload: &str) -> std::result::Result<(), String> {
            if self.fail_paste.get() {
                return Err("tmux load-buffer failed".to_string());
            }
            self.pastes
                .borrow_mut()
                .push((pane_handle.to_string(), payload.to_string()));
            Ok(())
        }

        fn pane_alive(&self, _pane_handle: &str) -> bool {
            !self.dead.get()
        }
    }

    pub struct Harness {
        pub tmp: tempfile::TempDir,
        pub router: Router<MockInjector>,
        pub injector: MockInjector,
        pub warnings: Rc<RefCell<Vec<String>>>,
    }

    impl Harness {
        pub fn session_file(&self, agent: Agent) -> PathBuf {
            self.tmp.path().join(format!("{agent}.jsonl"))
        }

        pub fn append(&self, agent: Agent, line: &str) {
            let mut file = OpenOptions::new()
                .append(true)
                .open(self.session_file(agent))
                .unwrap();
            writeln!(file, "{line}").unwrap();
        }

        pub fn append_raw(&self, agent: Agent, content: &str) {
            let mut file = OpenOptions::new()
                .append(true)
                .open(self.session_file(agent))
                .unwrap();
            write!(file, "{content}").unwrap();
        }

        pub fn debug_file(&self, session_id: &str) -> PathBuf {
            self.tmp.path().join("debug").join(format!("{session_id}.txt"))
        }

        pub fn write_debug(&self, session_id: &str, lines: &[&str]) {
            let path = self.debug_file(session_id);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, lines.join("\n")).unwrap();
        }
    }

    pub fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        ensure_state_layout(tmp.path()).unwrap();

        for (agent, pane) in [(Agent::Claude, "%1"), (Agent::Codex, "%2")] {
            let session = tmp.path().join(format!("{agent}.jsonl"));
            std::fs::write(&session, "").unwrap();
            let payload = serde_json::json!({
                "agent": agent.as_str(),
                "session_file": session,
                "session_id": format!("{agent}-sess"),
                "pane_handle": pane,
                "cwd": tmp.path(),
                "registered_at": "2026-03-01T09:00:00+00:00",
            });
            std::fs::write(
                participant_file(tmp.path(), agent),
                serde_json::to_string_pretty(&payload).unwrap(),
            )
            .unwrap();
        }

        let participants = SessionParticipants::load(tmp.path()).unwrap();
        initialize_cursors_from_line_counts(tmp.path(), &participants).unwrap();

        let injector = MockInjector::default();
        let warnings: Rc<RefCell<Vec<String>>> = Rc::default();
        let warnings_sink = warnings.clone();
        let router = Router::new(
            tmp.path(),
            participants,
            injector.clone(),
            RoutingConfig {
                poll_interval: Duration::from_millis(5),
                turn_timeout: Duration::from_millis(100),
                claude_debug_dir: tmp.path().join("debug"),
            },
            Box::new(move |warning| warnings_sink.borrow_mut().push(warning.to_string())),
        );

        Harness {
            tmp,
            router,
            injector,
            warnings,
        }
    }

    // row builders

    pub fn claude_user(text: &str) -> String {
        serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": text},
        })
        .to_string()
    }

    pub fn claude_assistant(text: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
        })
        .to_string()
    }

    pub fn claude_tool_result_user() -> String {
        serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": [{"type": "tool_result", "content": "ok"}]},
        })
        .to_string()
    }

    pub fn claude_turn_duration() -> String {
        serde_json::json!({"type": "system", "subtype": "turn_duration", "durationMs": 900})
            .to_string()
    }

    pub fn codex_user(text: &str) -> String {
        serde_json::json!({
            "type": "event_msg",
            "payload": {"type": "user_message", "message": text},
        })
        .to_string()
    }

    pub fn codex_assistant(text: &str) -> String {
        serde_json::json!({
            "type": "response_item",
            "payload": {"type": "message", "role": "assistant", "content": [{"text": text}]},
        })
        .to_string()
    }

    pub fn codex_task_started() -> String {
        serde_json::json!({"type": "event_msg", "payload": {"type": "task_started"}}).to_string()
    }

    pub fn codex_task_complete() -> String {
        serde_json::json!({"type": "event_msg", "payload": {"type": "task_complete"}}).to_string()
    }
}
