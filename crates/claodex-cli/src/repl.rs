//! Interactive REPL controller: dispatches line events to the router, polls
//! pending watches on idle ticks, and hands control to the collab
//! orchestrator when asked.

use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

use claodex_bus::{Event, EventBus, EventKind};
use claodex_core::{last_line_is, strip_trailing_signal, Agent, COLLAB_SIGNAL};
use claodex_router::{Injector, PendingSend, ResponseTurn, Router};
use claodex_store::cursor_snapshot;

use crate::collab::{parse_collab_request, run_collab, CollabRequest};
use crate::config::DEFAULT_COLLAB_TURNS;
use crate::input::{count_words, InputEvent, InputHub};

/// One message prefix after a halted collab, so the target knows the
/// automated exchange was cut short.
const POST_HALT_PREFIX: &str = "(collab halted by user)\n\n";

pub struct Repl<I: Injector> {
    workspace_root: PathBuf,
    router: Router<I>,
    bus: EventBus,
    hub: Arc<InputHub>,
    target: Agent,
    post_halt: bool,
    collab_seed: Option<(PendingSend, ResponseTurn)>,
}

impl<I: Injector> Repl<I> {
    pub fn new(
        workspace_root: PathBuf,
        router: Router<I>,
        bus: EventBus,
        hub: Arc<InputHub>,
    ) -> Self {
        Repl {
            workspace_root,
            router,
            bus,
            hub,
            target: Agent::Claude,
            post_halt: false,
            collab_seed: None,
        }
    }

    /// Run until quit.
    pub fn run(&mut self) {
        self.bus
            .log(Event::new(EventKind::System, "claodex ready"));
        loop {
            let event = self.hub.next(self.router.config().poll_interval);
            match event {
                InputEvent::Quit => {
                    self.bus
                        .log(Event::new(EventKind::System, "shutting down"));
                    return;
                }
                InputEvent::ToggleTarget => self.toggle_target(),
                InputEvent::Idle => {
                    self.poll_watches();
                    if self.collab_seed.is_some() {
                        self.enter_agent_collab();
                    }
                }
                InputEvent::Submit(text) => {
                    if self.handle_submit(&text) {
                        return;
                    }
                }
            }
        }
    }

    fn toggle_target(&mut self) {
        self.target = self.target.peer();
        let target = self.target;
        self.bus.update_metrics(|metrics| metrics.target = target);
    }

    /// Returns true when the REPL should quit.
    fn handle_submit(&mut self, raw: &str) -> bool {
        let text = raw.trim();
        if text.is_empty() {
            return false;
        }

        if text.starts_with('/') {
            match text {
                "/quit" => {
                    self.bus
                        .log(Event::new(EventKind::System, "shutting down"));
                    return true;
                }
                "/switch" => {
                    self.toggle_target();
                    return false;
                }
                "/status" => {
                    self.emit_status();
                    return false;
                }
                "/halt" => {
                    self.bus.log(Event::new(
                        EventKind::System,
                        "no active collaboration to halt",
                    ));
                    return false;
                }
                _ if text.starts_with("/collab") => {
                    match parse_collab_request(text, self.target) {
                        Ok(request) => self.enter_collab(request, None),
                        Err(err) => {
                            self.bus
                                .log(Event::new(EventKind::Error, err.to_string()));
                        }
                    }
                    return false;
                }
                _ => {
                    self.bus.log(Event::new(
                        EventKind::Error,
                        format!("unknown command: {text}"),
                    ));
                    return false;
                }
            }
        }

        let mut message = text.to_string();
        if self.post_halt {
            message = format!("{POST_HALT_PREFIX}{message}");
            self.post_halt = false;
        }

        let target = self.target;
        if self.router.watch(target).is_some() {
            self.bus.log(Event::new(
                EventKind::Watch,
                format!("replaced pending collab watch for {target}"),
            ));
        }
        match self.router.send_user_message(target, &message) {
            Ok(_) => {
                self.bus
                    .log(Event::new(EventKind::Sent, format!("-> {target}")).target(target));
                let sent_at = self
                    .router
                    .watch(target)
                    .map(|watch| watch.sent_at)
                    .unwrap_or_else(OffsetDateTime::now_utc);
                self.bus.mark_thinking(target, rfc3339(sent_at));
            }
            Err(err) => {
                self.bus
                    .log(Event::new(EventKind::Error, err.to_string()));
            }
        }
        false
    }

    /// One idle tick: check every outstanding watch for expiry or a
    /// completed response, and stash a collab seed when an agent signals.
    fn poll_watches(&mut self) {
        for target in self.router.watched_targets() {
            let Some(pending) = self.router.watch(target).cloned() else {
                continue;
            };

            let elapsed = OffsetDateTime::now_utc() - pending.sent_at;
            if elapsed.as_seconds_f64() > self.router.config().turn_timeout.as_secs_f64() {
                self.router.clear_watch(target);
                self.bus.log(
                    Event::new(
                        EventKind::Watch,
                        format!("expired collab watch for {target}"),
                    )
                    .agent(target),
                );
                continue;
            }

            let response = match self.router.poll_for_response(target) {
                Ok(Some(response)) => response,
                Ok(None) => continue,
                Err(err) => {
                    self.bus.log(
                        Event::new(EventKind::Watch, format!("error polling {target}: {err}"))
                            .agent(target),
                    );
                    continue;
                }
            };

            let words = count_words(&response.text);
            let latency = (OffsetDateTime::now_utc() - pending.sent_at)
                .as_seconds_f64()
                .max(0.0);
            self.bus.mark_idle(response.agent, Some(words), Some(latency));
            self.bus.log(
                Event::new(
                    EventKind::Recv,
                    format!("<- {} ({words} words)", response.agent),
                )
                .agent(response.agent),
            );

            if last_line_is(&response.text, COLLAB_SIGNAL) {
                let clean = strip_trailing_signal(&response.text, COLLAB_SIGNAL);
                if clean.trim().is_empty() {
                    self.bus.log(
                        Event::new(
                            EventKind::Watch,
                            format!("{target} signaled [COLLAB] with no content, ignoring"),
                        )
                        .agent(target),
                    );
                    continue;
                }
                self.collab_seed = Some((
                    pending,
                    ResponseTurn {
                        text: clean,
                        ..response
                    },
                ));
                return;
            }
        }
    }

    fn enter_agent_collab(&mut self) {
        let Some((pending, response)) = self.collab_seed.take() else {
            return;
        };
        self.bus.log(
            Event::new(
                EventKind::Collab,
                format!("{} initiated collaboration", response.agent),
            )
            .agent(response.agent),
        );
        let request = CollabRequest {
            turns: DEFAULT_COLLAB_TURNS,
            start_agent: response.agent,
            message: String::new(),
        };
        self.enter_collab(request, Some((pending, response)));
    }

    fn enter_collab(
        &mut self,
        request: CollabRequest,
        seed: Option<(PendingSend, ResponseTurn)>,
    ) {
        // a collab owns turn detection: normal-mode watches and their
        // latches would only fight it
        self.router.clear_all_watches();
        let outcome = run_collab(
            &self.workspace_root,
            &mut self.router,
            &self.bus,
            &self.hub,
            request,
            seed,
        );
        self.post_halt = outcome.post_halt;
    }

    fn emit_status(&mut self) {
        let snapshot = cursor_snapshot(&self.workspace_root).ok();
        let participants = self.router.participants();
        let meta = serde_json::json!({
            "target": self.target,
            "participants": {
                "claude": {
                    "pane": participants.for_agent(Agent::Claude).pane_handle,
                    "session_id": participants.for_agent(Agent::Claude).session_id,
                    "session_file": participants.for_agent(Agent::Claude).session_file,
                },
                "codex": {
                    "pane": participants.for_agent(Agent::Codex).pane_handle,
                    "session_id": participants.for_agent(Agent::Codex).session_id,
                    "session_file": participants.for_agent(Agent::Codex).session_file,
                },
            },
            "cursors": snapshot,
            "pending_watches": self
                .router
                .watched_targets()
                .iter()
                .map(|agent| agent.as_str())
                .collect::<Vec<_>>(),
            "post_halt": self.post_halt,
        });
        let target = self.target;
        self.bus.log(
            Event::new(EventKind::Status, "status snapshot")
                .target(target)
                .meta(meta),
        );
    }
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
