//! Shared fixtures for REPL and collab tests: a scripted injector that
//! plays both agents by appending rows to their session logs on paste.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use claodex_bus::EventBus;
use claodex_core::Agent;
use claodex_router::{Injector, Router, RoutingConfig};
use claodex_store::{
    ensure_state_layout, initialize_cursors_from_line_counts, participant_file,
    SessionParticipants,
};

use crate::input::{InputEvent, InputHub};

/// One scripted reaction to a paste: rows appended to the pasted agent's
/// session log.
#[derive(Clone)]
pub enum ScriptStep {
    /// The agent's TUI echoes the pasted payload as a user row.
    EchoUser,
    Assistant(String),
    TurnEndMarker,
}

#[derive(Clone, Default)]
pub struct ScriptedInjector {
    scripts: Rc<RefCell<HashMap<Agent, VecDeque<Vec<ScriptStep>>>>>,
    files: Rc<RefCell<HashMap<Agent, PathBuf>>>,
    pub pastes: Rc<RefCell<Vec<(Agent, String)>>>,
    pub paste_delay: Rc<RefCell<Duration>>,
}

impl ScriptedInjector {
    pub fn script(&self, agent: Agent, steps: Vec<ScriptStep>) {
        self.scripts
            .borrow_mut()
            .entry(agent)
            .or_default()
            .push_back(steps);
    }

    fn agent_for_pane(pane_handle: &str) -> Agent {
        match pane_handle {
            "%1" => Agent::Claude,
            _ => Agent::Codex,
        }
    }

    fn append_row(&self, agent: Agent, row: String) {
        let files = self.files.borrow();
        let mut file = OpenOptions::new()
            .append(true)
            .open(files.get(&agent).unwrap())
            .unwrap();
        writeln!(file, "{row}").unwrap();
    }

    fn play(&self, agent: Agent, payload: &str) {
        let steps = self
            .scripts
            .borrow_mut()
            .get_mut(&agent)
            .and_then(|queue| queue.pop_front());
        let Some(steps) = steps else {
            return;
        };
        for step in steps {
            let row = match (agent, step) {
                (Agent::Claude, ScriptStep::EchoUser) => serde_json::json!({
                    "type": "user",
                    "message": {"role": "user", "content": payload},
                })
                .to_string(),
                (Agent::Claude, ScriptStep::Assistant(text)) => serde_json::json!({
                    "type": "assistant",
                    "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
                })
                .to_string(),
                (Agent::Claude, ScriptStep::TurnEndMarker) => {
                    serde_json::json!({"type": "system", "subtype": "turn_duration"}).to_string()
                }
                (Agent::Codex, ScriptStep::EchoUser) => serde_json::json!({
                    "type": "event_msg",
                    "payload": {"type": "user_message", "message": payload},
                })
                .to_string(),
                (Agent::Codex, ScriptStep::Assistant(text)) => serde_json::json!({
                    "type": "response_item",
                    "payload": {"type": "message", "role": "assistant", "content": [{"text": text}]},
                })
                .to_string(),
                (Agent::Codex, ScriptStep::TurnEndMarker) => {
                    serde_json::json!({"type": "event_msg", "payload": {"type": "task_complete"}})
                        .to_string()
                }
            };
            self.append_row(agent, row);
        }
    }
}

impl Injector for ScriptedInjector {
    fn paste(&self, pane_handle: &str, payload: &str) -> Result<(), String> {
        let agent = Self::agent_for_pane(pane_handle);
        self.pastes.borrow_mut().push((agent, payload.to_string()));
        self.play(agent, payload);
        // give the halt listener a beat to drain queued input before the
        // next cooperative check
        std::thread::sleep(*self.paste_delay.borrow());
        Ok(())
    }

    fn pane_alive(&self, _pane_handle: &str) -> bool {
        true
    }
}

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub router: Router<ScriptedInjector>,
    pub injector: ScriptedInjector,
    pub bus: EventBus,
    pub hub: Arc<InputHub>,
    pub tx: Sender<InputEvent>,
}

impl Harness {
    pub fn payloads_for(&self, agent: Agent) -> Vec<String> {
        self.injector
            .pastes
            .borrow()
            .iter()
            .filter(|(pasted, _)| *pasted == agent)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

pub fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    ensure_state_layout(tmp.path()).unwrap();

    let injector = ScriptedInjector::default();
    for (agent, pane) in [(Agent::Claude, "%1"), (Agent::Codex, "%2")] {
        let session = tmp.path().join(format!("{agent}.jsonl"));
        std::fs::write(&session, "").unwrap();
        injector.files.borrow_mut().insert(agent, session.clone());
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
            serde_json::to_string(&payload).unwrap(),
        )
        .unwrap();
    }

    let participants = SessionParticipants::load(tmp.path()).unwrap();
    initialize_cursors_from_line_counts(tmp.path(), &participants).unwrap();

    let bus = EventBus::open(tmp.path(), Agent::Claude).unwrap();
    let warn_bus = bus.clone();
    let router = Router::new(
        tmp.path(),
        participants,
        injector.clone(),
        RoutingConfig {
            poll_interval: Duration::from_millis(5),
            turn_timeout: Duration::from_millis(300),
            claude_debug_dir: tmp.path().join("debug"),
        },
        Box::new(move |warning| {
            warn_bus.log(claodex_bus::Event::new(
                claodex_bus::EventKind::Error,
                warning,
            ));
        }),
    );

    let (tx, rx) = std::sync::mpsc::channel();
    let hub = InputHub::from_receiver(rx);

    Harness {
        tmp,
        router,
        injector,
        bus,
        hub,
        tx,
    }
}

pub fn read_bus_events(workspace: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(claodex_store::events_file(workspace))
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
