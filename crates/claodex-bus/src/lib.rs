//! Sidebar event sink: an append-only event log plus an atomically replaced
//! metrics snapshot, both serialized behind one mutex.
//!
//! The bus is the system's structured log. Producers on the main thread,
//! the poll path, and the halt listener all hold clones; each write is one
//! atomic record in mutex-acquisition order.

use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use claodex_core::{Agent, Result};
use claodex_store::{events_file, metrics_file, write_atomic};

// ── Events ──

/// Persisted event kinds. The closed enum is the whitelist: anything else
/// cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sent,
    Recv,
    Collab,
    Watch,
    Error,
    System,
    Status,
}

/// One event record under construction.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(skip)]
    kind: EventKind,
    agent: Option<Agent>,
    target: Option<Agent>,
    message: String,
    meta: Option<Value>,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Event {
            kind,
            agent: None,
            target: None,
            message: message.into(),
            meta: None,
        }
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn target(mut self, target: Agent) -> Self {
        self.target = Some(target);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Serialize)]
struct EventRecord<'a> {
    ts: String,
    kind: EventKind,
    agent: Option<Agent>,
    target: Option<Agent>,
    message: &'a str,
    meta: Option<&'a Value>,
}

// ── Metrics ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Collab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Thinking,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub status: AgentStatus,
    pub thinking_since: Option<String>,
    pub last_words: Option<u64>,
    pub last_latency_s: Option<f64>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        AgentMetrics {
            status: AgentStatus::Idle,
            thinking_since: None,
            last_words: None,
            last_latency_s: None,
        }
    }
}

/// Canonical metrics snapshot. The field set is the schema; the writer
/// always persists the complete snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub target: Agent,
    pub mode: Mode,
    pub collab_turn: Option<u32>,
    pub collab_max: Option<u32>,
    pub uptime_start: String,
    pub agents: AgentsMetrics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentsMetrics {
    pub claude: AgentMetrics,
    pub codex: AgentMetrics,
}

impl AgentsMetrics {
    pub fn for_agent_mut(&mut self, agent: Agent) -> &mut AgentMetrics {
        match agent {
            Agent::Claude => &mut self.claude,
            Agent::Codex => &mut self.codex,
        }
    }
}

// ── Bus ──

struct Inner {
    events: File,
    metrics_path: PathBuf,
    snapshot: MetricsSnapshot,
    closed: bool,
}

/// Thread-safe writer for UI events and metrics snapshots. Cheap to clone;
/// clones share one mutex-guarded sink.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    /// Open the bus for a workspace. Both files are truncated: a session
    /// starts with an empty log and a fresh snapshot.
    pub fn open(workspace_root: &Path, default_target: Agent) -> Result<Self> {
        let events_path = events_file(workspace_root);
        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let events = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&events_path)?;

        let snapshot = MetricsSnapshot {
            target: default_target,
            mode: Mode::Normal,
            collab_turn: None,
            collab_max: None,
            uptime_start: now_rfc3339(),
            agents: AgentsMetrics::default(),
        };

        let bus = EventBus {
            inner: Arc::new(Mutex::new(Inner {
                events,
                metrics_path: metrics_file(workspace_root),
                snapshot,
                closed: false,
            })),
        };
        bus.write_metrics_locked(&mut bus.inner.lock().expect("bus mutex poisoned"));
        Ok(bus)
    }

    /// Append one event record. Best-effort: a closed bus or write failure
    /// drops the record, never the caller.
    pub fn log(&self, event: Event) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        if inner.closed {
            return;
        }
        let record = EventRecord {
            ts: now_rfc3339(),
            kind: event.kind,
            agent: event.agent,
            target: event.target,
            message: &event.message,
            meta: event.meta.as_ref(),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = writeln!(inner.events, "{line}");
            let _ = inner.events.flush();
        }
    }

    /// Mutate the canonical snapshot under the lock, then atomically
    /// overwrite the metrics file with the complete result.
    pub fn update_metrics(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        if inner.closed {
            return;
        }
        apply(&mut inner.snapshot);
        self.write_metrics_locked(&mut inner);
    }

    /// Convenience: mark one agent thinking since `since` (RFC 3339).
    pub fn mark_thinking(&self, agent: Agent, since: String) {
        self.update_metrics(|metrics| {
            let slot = metrics.agents.for_agent_mut(agent);
            slot.status = AgentStatus::Thinking;
            slot.thinking_since = Some(since);
        });
    }

    /// Convenience: mark one agent idle and record turn stats.
    pub fn mark_idle(&self, agent: Agent, words: Option<u64>, latency_s: Option<f64>) {
        self.update_metrics(|metrics| {
            let slot = metrics.agents.for_agent_mut(agent);
            slot.status = AgentStatus::Idle;
            slot.thinking_since = None;
            if words.is_some() {
                slot.last_words = words;
            }
            slot.last_latency_s = latency_s;
        });
    }

    /// Flush and close. Further writes are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("bus mutex poisoned");
        if inner.closed {
            return;
        }
        let _ = inner.events.flush();
        inner.closed = true;
    }

    fn write_metrics_locked(&self, inner: &mut Inner) {
        if let Ok(payload) = serde_json::to_string_pretty(&inner.snapshot) {
            let mut data = payload.into_bytes();
            data.push(b'\n');
            let _ = write_atomic(&inner.metrics_path, &data);
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
