//! Turn-end waiting: the blocking collab wait and the non-blocking idle
//! poll share one scan pass over the watch window.

use std::time::{Duration, Instant};
use time::OffsetDateTime;

use claodex_core::{Agent, ClaodexError, Result, RoomEvent};
use claodex_extract::{
    claude_assistant_after_last_user_boundary, claude_nonmeta_user_texts, scan_turn_end,
};
use claodex_store::{read_lines_between, read_read_cursor};

use crate::watch::ResponseTurn;
use crate::{Injector, Router};

struct ScanPass {
    response: Option<ResponseTurn>,
    saw_codex_task_started: bool,
}

fn marker_label(target: Agent) -> &'static str {
    match target {
        Agent::Codex => "event_msg.payload.type=task_complete",
        Agent::Claude => "system.subtype=turn_duration",
    }
}

impl<I: Injector> Router<I> {
    /// Block until the target's turn ends, interference aborts, or the
    /// deadline expires. Clears the watch on every terminal outcome.
    pub fn wait_for_response(
        &mut self,
        target: Agent,
        timeout_override: Option<Duration>,
    ) -> Result<ResponseTurn> {
        let timeout = timeout_override.unwrap_or(self.config.turn_timeout);
        let deadline = Instant::now() + timeout;
        let mut saw_codex_task_started = false;

        loop {
            if !self.pane_alive(target) {
                self.clear_watch(target);
                return Err(ClaodexError::PaneDead(target));
            }

            let pass = match self.scan_once(target, true) {
                Ok(pass) => pass,
                Err(err) => {
                    self.clear_watch(target);
                    return Err(err);
                }
            };
            saw_codex_task_started |= pass.saw_codex_task_started;
            if let Some(response) = pass.response {
                self.clear_watch(target);
                return Ok(response);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        }

        let err = self.timeout_error(target, timeout, saw_codex_task_started);
        self.clear_watch(target);
        Err(err)
    }

    /// One non-blocking check of an outstanding watch. `Ok(None)` means
    /// nothing yet; stop-event latches survive between calls.
    pub fn poll_for_response(&mut self, target: Agent) -> Result<Option<ResponseTurn>> {
        if self.watch(target).is_none() {
            return Ok(None);
        }
        if !self.pane_alive(target) {
            self.clear_watch(target);
            return Err(ClaodexError::PaneDead(target));
        }
        // normal-mode polling: typing directly into a pane is legitimate,
        // so the interference abort stays off
        let pass = match self.scan_once(target, false) {
            Ok(pass) => pass,
            Err(err) => {
                self.clear_watch(target);
                return Err(err);
            }
        };
        if let Some(response) = pass.response {
            self.clear_watch(target);
            return Ok(Some(response));
        }
        Ok(None)
    }

    /// One scan of the watch window `(anchor_cursor, read[target]]`.
    fn scan_once(&mut self, target: Agent, interference_abort: bool) -> Result<ScanPass> {
        let Some(pending) = self.watch(target).cloned() else {
            return Err(ClaodexError::Validation(format!(
                "no pending send for {target}"
            )));
        };

        let current = self.refresh_source(target)?;
        let anchor = pending.anchor_cursor;
        let session_file = self.participants().for_agent(target).session_file.clone();
        let lines = read_lines_between(&session_file, anchor, Some(current))?;

        if interference_abort && target == Agent::Claude {
            for text in claude_nonmeta_user_texts(&lines) {
                if !pending.is_echo(&text) {
                    return Err(ClaodexError::Interference(target));
                }
            }
        }

        let scan = scan_turn_end(target, &lines, anchor);

        if let Some(marker_line) = scan.marker_line {
            let text = self.latest_assistant_between(target, anchor, marker_line)?;
            let Some(text) = text else {
                return Err(ClaodexError::smoke_signal(
                    target,
                    format!(
                        "{target} emitted {} but no assistant message was extractable for that \
                         turn window; refusing heuristic fallback",
                        marker_label(target)
                    ),
                ));
            };
            return Ok(ScanPass {
                response: Some(ResponseTurn {
                    agent: target,
                    text,
                    source_cursor: marker_line,
                    detected_at: OffsetDateTime::now_utc(),
                }),
                saw_codex_task_started: scan.saw_codex_task_started,
            });
        }

        if target == Agent::Claude {
            if let Some(response) = self.claude_stop_fallback(&pending, current, &lines)? {
                return Ok(ScanPass {
                    response: Some(response),
                    saw_codex_task_started: false,
                });
            }
        }

        Ok(ScanPass {
            response: None,
            saw_codex_task_started: scan.saw_codex_task_started,
        })
    }

    /// Stop-event fallback: the fast-path marker is not always emitted
    /// promptly. A Stop line newer than the send only completes the turn
    /// once the boundary-aware extractor yields text; until then the stop
    /// timestamp latches and the next poll retries after the log flushes.
    fn claude_stop_fallback(
        &mut self,
        pending: &crate::PendingSend,
        current_cursor: u64,
        lines: &[String],
    ) -> Result<Option<ResponseTurn>> {
        let target = pending.target;
        let anchor = pending.anchor_cursor;
        let session_id = self.participants().for_agent(target).session_id.clone();
        let debug_file = self
            .config
            .claude_debug_dir
            .join(format!("{session_id}.txt"));

        let stop_ts = claodex_extract::scan_stop_event(&debug_file, pending.sent_at)?
            .or_else(|| self.latch(target, anchor));
        let Some(stop_ts) = stop_ts else {
            return Ok(None);
        };

        match claude_assistant_after_last_user_boundary(lines) {
            Some(text) if !text.is_empty() => {
                self.clear_latch(target, anchor);
                Ok(Some(ResponseTurn {
                    agent: target,
                    text,
                    source_cursor: current_cursor,
                    detected_at: stop_ts,
                }))
            }
            _ => {
                self.set_latch(target, anchor, stop_ts);
                Ok(None)
            }
        }
    }

    fn timeout_error(
        &mut self,
        target: Agent,
        timeout: Duration,
        saw_codex_task_started: bool,
    ) -> ClaodexError {
        let timeout_text = format!("{}s", timeout.as_secs_f64());
        if target == Agent::Codex && saw_codex_task_started {
            return ClaodexError::smoke_signal(
                target,
                format!(
                    "codex emitted task_started but no task_complete marker within \
                     {timeout_text}; refusing heuristic fallback"
                ),
            );
        }

        let saw_assistant_output = self
            .watch(target)
            .map(|pending| pending.anchor_cursor)
            .and_then(|anchor| {
                let current = read_read_cursor(&self.workspace_root, target).ok()?;
                let events = self.events_between(target, anchor, current).ok()?;
                Some(
                    events
                        .iter()
                        .any(|event| matches!(event, RoomEvent::AssistantText(_))),
                )
            })
            .unwrap_or(false);

        if saw_assistant_output {
            ClaodexError::smoke_signal(
                target,
                format!(
                    "{target} emitted assistant output but no {} marker arrived within \
                     {timeout_text}; refusing heuristic fallback",
                    marker_label(target)
                ),
            )
        } else {
            ClaodexError::smoke_signal(
                target,
                format!(
                    "missing {} marker from {target} within {timeout_text}",
                    marker_label(target)
                ),
            )
        }
    }
}
