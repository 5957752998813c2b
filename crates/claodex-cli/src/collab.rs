//! Multi-turn collab orchestration: the automated routing loop between the
//! two agents, with user interjections, convergence, and halt handling.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

use claodex_bus::{Event, EventBus, EventKind, Mode};
use claodex_core::{
    last_line_is, normalize_anchor, strip_trailing_signal, Agent, ClaodexError, Result,
    COLLAB_SIGNAL, CONVERGE_SIGNAL,
};
use claodex_router::{Injector, PendingSend, ResponseTurn, Router};

use crate::config::DEFAULT_COLLAB_TURNS;
use crate::exchange::ExchangeLog;
use crate::input::{count_words, InputEvent, InputHub};

/// Parsed `/collab` command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollabRequest {
    pub turns: u32,
    pub start_agent: Agent,
    pub message: String,
}

/// Result of one collab run, consumed by the REPL on return to normal mode.
#[derive(Debug)]
pub struct CollabOutcome {
    pub stop_reason: String,
    pub turns_completed: u32,
    /// The next user-facing send gets the halt prefix.
    pub post_halt: bool,
}

/// Skip `count` whitespace-delimited tokens and return the raw remainder,
/// preserving the message's original spacing.
fn remainder_after_tokens(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        rest = rest.trim_start();
        match rest.find(char::is_whitespace) {
            Some(end) => rest = &rest[end..],
            None => return "",
        }
    }
    rest.trim_start()
}

/// Parse `/collab [--turns N] [--start agent] [--] message...`.
pub fn parse_collab_request(command_text: &str, default_start: Agent) -> Result<CollabRequest> {
    let pieces: Vec<&str> = command_text.split_whitespace().collect();
    if pieces.first() != Some(&"/collab") {
        return Err(ClaodexError::Validation(
            "malformed collab command".to_string(),
        ));
    }

    let mut turns = DEFAULT_COLLAB_TURNS;
    let mut start_agent = default_start;
    let mut index = 1;

    while index < pieces.len() {
        match pieces[index] {
            "--turns" => {
                let value = pieces.get(index + 1).ok_or_else(|| {
                    ClaodexError::Validation("--turns requires a value".to_string())
                })?;
                turns = value.parse::<u32>().ok().filter(|&n| n > 0).ok_or_else(|| {
                    ClaodexError::Validation("--turns must be a positive integer".to_string())
                })?;
                index += 2;
            }
            "--start" => {
                let value = pieces.get(index + 1).ok_or_else(|| {
                    ClaodexError::Validation("--start requires a value".to_string())
                })?;
                start_agent = value.parse()?;
                index += 2;
            }
            "--" => {
                index += 1;
                break;
            }
            token if token.starts_with("--") => {
                return Err(ClaodexError::Validation(format!(
                    "unknown option '{token}'"
                )));
            }
            _ => break,
        }
    }

    let message = remainder_after_tokens(command_text, index).trim_end().to_string();
    if message.is_empty() {
        return Err(ClaodexError::Validation(
            "/collab requires a message".to_string(),
        ));
    }

    Ok(CollabRequest {
        turns,
        start_agent,
        message,
    })
}

fn drain(queue: &Mutex<VecDeque<String>>) -> Vec<String> {
    queue.lock().expect("interjection queue poisoned").drain(..).collect()
}

fn stop_reason_for(err: &ClaodexError) -> &'static str {
    match err {
        ClaodexError::PaneDead(_) | ClaodexError::InjectFailed(_, _) => "pane_dead",
        ClaodexError::SmokeSignal { .. } => "timeout",
        ClaodexError::Interference(_) => "interference",
        _ => "error",
    }
}

fn latency_seconds(sent_at: OffsetDateTime) -> f64 {
    let delta = OffsetDateTime::now_utc() - sent_at;
    delta.as_seconds_f64().max(0.0)
}

struct LoopState {
    turns_completed: u32,
    last_unrouted: Option<Agent>,
    pending_converge: Option<Agent>,
    replayed_last: Vec<String>,
    first_route: bool,
}

/// Drive one collab session to completion. All exits funnel through the
/// single cleanup path: selective cursor sync, exchange footer, terminal
/// event, post-halt flag.
pub fn run_collab<I: Injector>(
    workspace_root: &Path,
    router: &mut Router<I>,
    bus: &EventBus,
    hub: &Arc<InputHub>,
    request: CollabRequest,
    seed: Option<(PendingSend, ResponseTurn)>,
) -> CollabOutcome {
    let initiated_by = seed
        .as_ref()
        .map(|(_, response)| response.agent.as_str())
        .unwrap_or("user");
    bus.log(
        Event::new(
            EventKind::Collab,
            format!(
                "starting: target={} turns={}",
                request.start_agent, request.turns
            ),
        )
        .target(request.start_agent),
    );
    bus.update_metrics(|metrics| {
        metrics.mode = Mode::Collab;
        metrics.collab_turn = None;
        metrics.collab_max = Some(request.turns);
    });

    let mut exchange = ExchangeLog::create(
        workspace_root,
        &request.message,
        initiated_by,
        OffsetDateTime::now_utc(),
    )
    .map_err(|err| {
        bus.log(Event::new(
            EventKind::Error,
            format!("exchange log unavailable: {err}"),
        ));
        err
    })
    .ok();

    // halt listener: owns the input hub for the duration, queues
    // interjections, and only ever flips the atomic flag
    let halt = Arc::new(AtomicBool::new(false));
    let stop_listener = Arc::new(AtomicBool::new(false));
    let interjections = Arc::new(Mutex::new(VecDeque::new()));
    let listener = {
        let halt = halt.clone();
        let stop = stop_listener.clone();
        let interjections = interjections.clone();
        let hub = hub.clone();
        let bus = bus.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && !halt.load(Ordering::SeqCst) {
                match hub.next(Duration::from_millis(100)) {
                    InputEvent::Submit(text) => {
                        let trimmed = text.trim();
                        if trimmed == "/halt" {
                            let dropped = interjections
                                .lock()
                                .expect("interjection queue poisoned")
                                .len();
                            halt.store(true, Ordering::SeqCst);
                            let message = if dropped > 0 {
                                format!("halt requested (dropped {dropped} queued interjection(s))")
                            } else {
                                "halt requested".to_string()
                            };
                            bus.log(Event::new(EventKind::Collab, message));
                        } else if !trimmed.is_empty() {
                            interjections
                                .lock()
                                .expect("interjection queue poisoned")
                                .push_back(trimmed.to_string());
                            bus.log(Event::new(EventKind::Collab, "interjection queued"));
                        }
                    }
                    InputEvent::Quit => {
                        halt.store(true, Ordering::SeqCst);
                        bus.log(Event::new(EventKind::Collab, "halt requested (input closed)"));
                    }
                    InputEvent::ToggleTarget | InputEvent::Idle => {}
                }
            }
        })
    };

    let mut state = LoopState {
        turns_completed: 0,
        last_unrouted: None,
        pending_converge: None,
        replayed_last: Vec::new(),
        first_route: true,
    };

    let result = drive(
        router,
        bus,
        &request,
        seed,
        &halt,
        &interjections,
        exchange.as_mut(),
        &mut state,
    );

    // ── single cleanup path ──

    stop_listener.store(true, Ordering::SeqCst);
    let _ = listener.join();

    let stop_reason = match &result {
        Ok(reason) => reason.to_string(),
        Err(err) => {
            bus.log(Event::new(EventKind::Error, err.to_string()));
            if halt.load(Ordering::SeqCst) {
                // the wait failed while a halt was pending: halt wins,
                // with no response in hand
                state.last_unrouted = None;
                "user_halt".to_string()
            } else {
                stop_reason_for(err).to_string()
            }
        }
    };

    let remaining = drain(&interjections);
    if !remaining.is_empty() {
        bus.log(Event::new(
            EventKind::Collab,
            format!("dropped {} queued interjection(s)", remaining.len()),
        ));
    }

    // selective sync: an unrouted response stays deliverable as delta to
    // the halted agent's peer
    let sync_scope: Vec<Agent> = match (stop_reason.as_str(), state.last_unrouted) {
        ("user_halt", Some(agent)) => Agent::ALL
            .into_iter()
            .filter(|&candidate| candidate != agent.peer())
            .collect(),
        _ => Agent::ALL.to_vec(),
    };
    if let Err(err) = router.sync_delivery_cursors(&sync_scope) {
        bus.log(Event::new(
            EventKind::Error,
            format!("cursor sync on collab exit failed: {err}"),
        ));
    }

    if let Some(exchange) = exchange {
        match exchange.close(state.turns_completed, &stop_reason) {
            Ok(path) => bus.log(Event::new(
                EventKind::Collab,
                format!(
                    "halted: {} turns, reason={stop_reason}, exchange={}",
                    state.turns_completed,
                    path.display()
                ),
            )),
            Err(err) => bus.log(Event::new(
                EventKind::Error,
                format!("exchange log close failed: {err}"),
            )),
        }
    }

    bus.log(Event::new(
        EventKind::Collab,
        format!(
            "stopped: turns={} reason={stop_reason}",
            state.turns_completed
        ),
    ));
    bus.update_metrics(|metrics| {
        metrics.mode = Mode::Normal;
        metrics.collab_turn = None;
        metrics.collab_max = None;
    });

    CollabOutcome {
        post_halt: stop_reason == "user_halt",
        stop_reason,
        turns_completed: state.turns_completed,
    }
}

#[allow(clippy::too_many_arguments)]
fn drive<I: Injector>(
    router: &mut Router<I>,
    bus: &EventBus,
    request: &CollabRequest,
    seed: Option<(PendingSend, ResponseTurn)>,
    halt: &AtomicBool,
    interjections: &Mutex<VecDeque<String>>,
    mut exchange: Option<&mut ExchangeLog>,
    state: &mut LoopState,
) -> Result<&'static str> {
    let mut current = match seed {
        Some((pending, response)) => {
            // agent-initiated: turn 1 already completed in normal mode
            state.turns_completed = 1;
            if let Some(exchange) = exchange.as_deref_mut() {
                for block in &pending.blocks {
                    let _ = exchange.append_message(
                        block.source.as_str(),
                        &block.body,
                        pending.sent_at,
                    );
                }
                let _ =
                    exchange.append_message(response.agent.as_str(), &response.text, response.detected_at);
            }
            record_received(bus, request, state, &response, Some(pending.sent_at));
            response
        }
        None => {
            let blocks = router.send_user_message(request.start_agent, &request.message)?;
            let sent_at = router
                .watch(request.start_agent)
                .map(|watch| watch.sent_at)
                .unwrap_or_else(OffsetDateTime::now_utc);
            bus.log(
                Event::new(EventKind::Sent, format!("-> {}", request.start_agent))
                    .target(request.start_agent),
            );
            bus.mark_thinking(request.start_agent, rfc3339(sent_at));
            if let Some(exchange) = exchange.as_deref_mut() {
                for block in &blocks {
                    let _ = exchange.append_message(block.source.as_str(), &block.body, sent_at);
                }
            }
            bus.log(
                Event::new(
                    EventKind::Collab,
                    format!("turn 1 -> {} (waiting...)", request.start_agent),
                )
                .target(request.start_agent),
            );
            let response = router.wait_for_response(request.start_agent, None)?;
            state.turns_completed = 1;
            if let Some(exchange) = exchange.as_deref_mut() {
                let _ = exchange.append_message(
                    response.agent.as_str(),
                    &response.text,
                    response.detected_at,
                );
            }
            record_received(bus, request, state, &response, Some(sent_at));
            response
        }
    };

    loop {
        // a response is in hand and unrouted
        if halt.load(Ordering::SeqCst) {
            state.last_unrouted = Some(current.agent);
            return Ok("user_halt");
        }

        let signaled = last_line_is(&current.text, CONVERGE_SIGNAL);
        let converged_now = signaled && state.pending_converge == Some(current.agent.peer());
        if !signaled {
            state.pending_converge = None;
        }

        if state.turns_completed >= request.turns && !converged_now {
            // the final response stays unrouted; the full sync absorbs it
            return Ok("turns_reached");
        }

        let source = current.agent;
        let target = source.peer();
        state.last_unrouted = Some(source);

        // [COLLAB] is coordinator plumbing and never routed onward; the
        // convergence signal rides along so the peer sees it
        let stripped = strip_trailing_signal(&current.text, COLLAB_SIGNAL);

        let drained = drain(interjections);
        let mut routed_interjections = state.replayed_last.clone();
        routed_interjections.extend(drained.iter().cloned());

        let echoed_anchor = if state.first_route && !request.message.trim().is_empty() {
            Some(normalize_anchor(&request.message))
        } else {
            None
        };

        router.send_routed_message(
            target,
            source,
            &stripped,
            &routed_interjections,
            echoed_anchor.as_deref(),
        )?;
        state.first_route = false;
        state.last_unrouted = None;

        let sent_at = router
            .watch(target)
            .map(|watch| watch.sent_at)
            .unwrap_or_else(OffsetDateTime::now_utc);
        if let Some(exchange) = exchange.as_deref_mut() {
            // replayed interjections were transcribed on the turn that
            // first carried them
            for interjection in &drained {
                let _ = exchange.append_message("user", interjection, sent_at);
            }
        }
        state.replayed_last = drained;

        bus.log(
            Event::new(
                EventKind::Collab,
                if routed_interjections.is_empty() {
                    format!("routing -> {target}")
                } else {
                    format!(
                        "routing -> {target} (with {} user interjection(s))",
                        routed_interjections.len()
                    )
                },
            )
            .target(target),
        );
        bus.mark_thinking(target, rfc3339(sent_at));

        if converged_now {
            return Ok("converged");
        }
        if signaled {
            state.pending_converge = Some(source);
        }

        if halt.load(Ordering::SeqCst) {
            return Ok("user_halt");
        }

        bus.log(
            Event::new(
                EventKind::Collab,
                format!("turn {} -> {target} (waiting...)", state.turns_completed + 1),
            )
            .target(target),
        );
        let response = router.wait_for_response(target, None)?;
        state.turns_completed += 1;
        if let Some(exchange) = exchange.as_deref_mut() {
            let _ = exchange.append_message(
                response.agent.as_str(),
                &response.text,
                response.detected_at,
            );
        }
        record_received(bus, request, state, &response, Some(sent_at));
        current = response;
    }
}

fn record_received(
    bus: &EventBus,
    request: &CollabRequest,
    state: &LoopState,
    response: &ResponseTurn,
    sent_at: Option<OffsetDateTime>,
) {
    let words = count_words(&response.text);
    bus.mark_idle(response.agent, Some(words), sent_at.map(latency_seconds));
    bus.update_metrics(|metrics| {
        metrics.collab_turn = Some(state.turns_completed.max(1));
        metrics.collab_max = Some(request.turns);
    });
    bus.log(
        Event::new(
            EventKind::Recv,
            format!("<- {} ({words} words)", response.agent),
        )
        .agent(response.agent),
    );
    bus.log(
        Event::new(
            EventKind::Collab,
            format!(
                "turn {} <- {} ({words} words)",
                state.turns_completed, response.agent
            ),
        )
        .agent(response.agent),
    );
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_only() {
        let request = parse_collab_request("/collab design the cache", Agent::Claude).unwrap();
        assert_eq!(request.turns, DEFAULT_COLLAB_TURNS);
        assert_eq!(request.start_agent, Agent::Claude);
        assert_eq!(request.message, "design the cache");
    }

    #[test]
    fn parse_with_options() {
        let request =
            parse_collab_request("/collab --turns 4 --start codex go", Agent::Claude).unwrap();
        assert_eq!(request.turns, 4);
        assert_eq!(request.start_agent, Agent::Codex);
        assert_eq!(request.message, "go");
    }

    #[test]
    fn parse_preserves_message_spacing_and_punctuation() {
        let request =
            parse_collab_request("/collab --turns 2 don't  stop --now", Agent::Codex).unwrap();
        assert_eq!(request.message, "don't  stop --now");
    }

    #[test]
    fn parse_double_dash_ends_options() {
        let request =
            parse_collab_request("/collab -- --turns is the message", Agent::Claude).unwrap();
        assert_eq!(request.turns, DEFAULT_COLLAB_TURNS);
        assert_eq!(request.message, "--turns is the message");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(parse_collab_request("/collab", Agent::Claude).is_err());
        assert!(parse_collab_request("/collab --turns 0 x", Agent::Claude).is_err());
        assert!(parse_collab_request("/collab --turns x y", Agent::Claude).is_err());
        assert!(parse_collab_request("/collab --start gemini x", Agent::Claude).is_err());
        assert!(parse_collab_request("/collab --bogus x", Agent::Claude).is_err());
        assert!(parse_collab_request("/halt", Agent::Claude).is_err());
    }

    #[test]
    fn remainder_preserves_raw_spacing() {
        assert_eq!(remainder_after_tokens("/collab a  b", 1), "a  b");
        assert_eq!(remainder_after_tokens("/collab --turns 3 go  now", 3), "go  now");
        assert_eq!(remainder_after_tokens("/collab", 1), "");
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(
            stop_reason_for(&ClaodexError::PaneDead(Agent::Claude)),
            "pane_dead"
        );
        assert_eq!(
            stop_reason_for(&ClaodexError::smoke_signal(Agent::Codex, "x")),
            "timeout"
        );
        assert_eq!(
            stop_reason_for(&ClaodexError::Interference(Agent::Claude)),
            "interference"
        );
        assert_eq!(
            stop_reason_for(&ClaodexError::Validation("x".into())),
            "error"
        );
    }
}
