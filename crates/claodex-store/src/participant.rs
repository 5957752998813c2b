use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use claodex_core::{Agent, ClaodexError, Result};

use crate::paths::participant_file;

/// Participant metadata registered by each agent-side skill.
///
/// Written once at registration and read-only for the core; the only
/// permitted change is a full re-registration (e.g. `/resume` inside the
/// agent), detected via the record file's mtime.
#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    /// Agent identity, `claude` or `codex`.
    pub agent: Agent,
    /// Absolute path to the agent's native JSONL session log.
    pub session_file: PathBuf,
    /// Source-native session identifier.
    pub session_id: String,
    /// Injector handle for the agent's input channel (e.g. a tmux pane id).
    pub pane_handle: String,
    /// Absolute workspace path seen by the agent process.
    pub cwd: PathBuf,
    /// ISO 8601 registration timestamp with offset.
    pub registered_at: String,
}

impl Participant {
    fn validate(&self, expected: Agent, source_path: &Path) -> Result<()> {
        let fail = |what: &str| {
            Err(ClaodexError::Validation(format!(
                "participant {what} in {}",
                source_path.display()
            )))
        };

        if self.agent != expected {
            return fail("agent mismatch");
        }
        if self.session_id.is_empty() {
            return fail("session_id missing");
        }
        if self.pane_handle.is_empty() {
            return fail("pane_handle missing");
        }
        if !self.session_file.is_absolute() {
            return fail("session_file must be absolute");
        }
        if !self.cwd.is_absolute() {
            return fail("cwd must be absolute");
        }
        // RFC 3339 requires an offset, which is exactly the constraint here
        if time::OffsetDateTime::parse(
            &self.registered_at,
            &time::format_description::well_known::Rfc3339,
        )
        .is_err()
        {
            return fail("registered_at invalid");
        }
        Ok(())
    }
}

/// Load and validate one participant record.
pub fn load_participant(workspace_root: &Path, agent: Agent) -> Result<Participant> {
    let path = participant_file(workspace_root, agent);
    if !path.exists() {
        return Err(ClaodexError::Validation(format!(
            "participant missing: {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(&path)?;
    let participant: Participant = serde_json::from_str(&content).map_err(|err| {
        ClaodexError::Validation(format!("malformed participant {}: {err}", path.display()))
    })?;
    participant.validate(agent, &path)?;

    if !participant.session_file.exists() {
        return Err(ClaodexError::Validation(format!(
            "participant session file missing: {}",
            participant.session_file.display()
        )));
    }
    Ok(participant)
}

fn record_mtime(workspace_root: &Path, agent: Agent) -> Option<SystemTime> {
    fs::metadata(participant_file(workspace_root, agent))
        .and_then(|meta| meta.modified())
        .ok()
}

/// Both participants, with their record mtimes captured at load so a
/// re-registration can be detected later.
#[derive(Debug, Clone)]
pub struct SessionParticipants {
    claude: Participant,
    codex: Participant,
    mtimes: [Option<SystemTime>; 2],
}

impl SessionParticipants {
    pub fn load(workspace_root: &Path) -> Result<Self> {
        Ok(SessionParticipants {
            claude: load_participant(workspace_root, Agent::Claude)?,
            codex: load_participant(workspace_root, Agent::Codex)?,
            mtimes: [
                record_mtime(workspace_root, Agent::Claude),
                record_mtime(workspace_root, Agent::Codex),
            ],
        })
    }

    pub fn for_agent(&self, agent: Agent) -> &Participant {
        match agent {
            Agent::Claude => &self.claude,
            Agent::Codex => &self.codex,
        }
    }

    /// Reload one participant when its record changed on disk (the agent
    /// re-registered, possibly pointing at a new session file). Returns true
    /// when a reload happened.
    pub fn refresh_if_reregistered(&mut self, workspace_root: &Path, agent: Agent) -> Result<bool> {
        let slot = match agent {
            Agent::Claude => 0,
            Agent::Codex => 1,
        };
        let current = record_mtime(workspace_root, agent);
        if current == self.mtimes[slot] {
            return Ok(false);
        }
        let reloaded = load_participant(workspace_root, agent)?;
        match agent {
            Agent::Claude => self.claude = reloaded,
            Agent::Codex => self.codex = reloaded,
        }
        self.mtimes[slot] = current;
        Ok(true)
    }
}
