//! claodex: a two-agent message router coordinating `claude` and `codex`
//! through their native session logs.

mod collab;
mod config;
mod exchange;
mod input;
mod repl;
#[cfg(test)]
mod testsupport;
mod tmux;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use claodex_bus::EventBus;
use claodex_core::Agent;
use claodex_router::{Injector, Router};
use claodex_store::{
    cursor_snapshot, delivery_cursor_file, ensure_gitignore_entry, ensure_state_layout,
    initialize_cursors_from_line_counts, load_participant, participant_file, read_cursor_file,
    SessionParticipants,
};

use crate::config::Config;
use crate::input::InputHub;
use crate::repl::Repl;
use crate::tmux::TmuxInjector;

/// How long `attach` waits for both agents to register.
const REGISTRATION_WAIT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "claodex", version, about = "Two-agent message router for claude and codex")]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Attach the coordinator REPL to a registered workspace
    Attach {
        /// Workspace directory (defaults to the current directory)
        directory: Option<PathBuf>,
    },
    /// Print participants and cursor positions
    Status {
        /// Workspace directory (defaults to the current directory)
        directory: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd.unwrap_or(Command::Attach { directory: None }) {
        Command::Attach { directory } => run_attach(&resolve_workspace(directory)?),
        Command::Status { directory } => run_status(&resolve_workspace(directory)?),
    }
}

/// Walk up from the given directory to a git root; a directory already
/// carrying `.claodex/` state also qualifies.
fn resolve_workspace(directory: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let start = directory.unwrap_or_else(|| PathBuf::from("."));
    let start = start
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", start.display()))?;

    let mut current = start.as_path();
    loop {
        if current.join(".claodex").is_dir() || current.join(".git").exists() {
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    bail!(
        "workspace must be a git repository or already contain .claodex state: {}",
        start.display()
    );
}

fn run_attach(workspace_root: &Path) -> anyhow::Result<()> {
    if !tmux::session_exists() {
        bail!("tmux session 'claodex' does not exist");
    }

    ensure_state_layout(workspace_root)?;
    ensure_gitignore_entry(workspace_root)?;

    let participants = wait_for_registration(workspace_root)?;
    validate_panes(&participants)?;

    if cursors_missing(workspace_root) {
        initialize_cursors_from_line_counts(workspace_root, &participants)?;
    }

    let config = Config::from_env();
    let bus = EventBus::open(workspace_root, Agent::Claude)?;
    let warn_bus = bus.clone();
    let router = Router::new(
        workspace_root,
        participants,
        TmuxInjector,
        config.routing(),
        Box::new(move |warning| {
            warn_bus.log(claodex_bus::Event::new(
                claodex_bus::EventKind::Error,
                warning,
            ));
        }),
    );

    let hub = InputHub::spawn_stdin();
    let mut repl = Repl::new(workspace_root.to_path_buf(), router, bus.clone(), hub);
    repl.run();
    bus.close();
    Ok(())
}

fn run_status(workspace_root: &Path) -> anyhow::Result<()> {
    let participants = SessionParticipants::load(workspace_root)?;
    let snapshot = cursor_snapshot(workspace_root)?;
    let payload = serde_json::json!({
        "workspace": workspace_root,
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
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Poll for both participant records. The user triggers registration by
/// pressing Enter on the prefilled skill command in each agent pane.
fn wait_for_registration(workspace_root: &Path) -> anyhow::Result<SessionParticipants> {
    let both_present = Agent::ALL
        .iter()
        .all(|&agent| participant_file(workspace_root, agent).exists());
    if both_present {
        return Ok(SessionParticipants::load(workspace_root)?);
    }

    eprintln!("waiting for agent registration (press Enter in each agent pane)...");
    let deadline = Instant::now() + REGISTRATION_WAIT;
    let mut waiting: Vec<Agent> = Agent::ALL.to_vec();

    while !waiting.is_empty() {
        if Instant::now() > deadline {
            let pending: Vec<&str> = waiting.iter().map(|agent| agent.as_str()).collect();
            bail!("registration timeout waiting for: {}", pending.join(", "));
        }
        waiting.retain(|&agent| {
            if !participant_file(workspace_root, agent).exists() {
                return true;
            }
            match load_participant(workspace_root, agent) {
                Ok(_) => {
                    eprintln!("  {agent} registered");
                    false
                }
                // half-written record: keep waiting
                Err(_) => true,
            }
        });
        if !waiting.is_empty() {
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    Ok(SessionParticipants::load(workspace_root)?)
}

fn validate_panes(participants: &SessionParticipants) -> anyhow::Result<()> {
    let injector = TmuxInjector;
    let dead: Vec<String> = Agent::ALL
        .iter()
        .filter(|&&agent| !injector.pane_alive(&participants.for_agent(agent).pane_handle))
        .map(|&agent| {
            format!(
                "{agent} ({})",
                participants.for_agent(agent).pane_handle
            )
        })
        .collect();
    if !dead.is_empty() {
        bail!("registered panes are not alive: {}", dead.join(", "));
    }
    Ok(())
}

fn cursors_missing(workspace_root: &Path) -> bool {
    Agent::ALL.iter().any(|&agent| {
        !read_cursor_file(workspace_root, agent).exists()
            || !delivery_cursor_file(workspace_root, agent).exists()
    })
}
