use std::fs;
use std::path::{Path, PathBuf};

use claodex_core::{Agent, Result};

/// Name of the workspace state directory.
const STATE_DIR: &str = ".claodex";

/// `.claodex/` root for a workspace.
pub fn state_root(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR)
}

/// Directory of participant records written by the agent-side registration.
pub fn participants_dir(workspace_root: &Path) -> PathBuf {
    state_root(workspace_root).join("participants")
}

/// Participant record for one agent.
pub fn participant_file(workspace_root: &Path, agent: Agent) -> PathBuf {
    participants_dir(workspace_root).join(format!("{agent}.json"))
}

/// Read cursor for one agent's session log.
pub fn read_cursor_file(workspace_root: &Path, agent: Agent) -> PathBuf {
    state_root(workspace_root)
        .join("state")
        .join("cursors")
        .join(format!("read-{agent}.cursor"))
}

/// Delivery cursor for one target agent.
pub fn delivery_cursor_file(workspace_root: &Path, target: Agent) -> PathBuf {
    state_root(workspace_root)
        .join("state")
        .join("delivery")
        .join(format!("to-{target}.cursor"))
}

/// Per-collab exchange transcripts.
pub fn exchanges_dir(workspace_root: &Path) -> PathBuf {
    state_root(workspace_root).join("exchanges")
}

/// Append-only event log consumed by the sidebar.
pub fn events_file(workspace_root: &Path) -> PathBuf {
    state_root(workspace_root).join("ui").join("events.jsonl")
}

/// Atomically replaced metrics snapshot consumed by the sidebar.
pub fn metrics_file(workspace_root: &Path) -> PathBuf {
    state_root(workspace_root).join("ui").join("metrics.json")
}

/// Keep `.claodex/` out of version control.
pub fn ensure_gitignore_entry(workspace_root: &Path) -> Result<()> {
    let entry = ".claodex/";
    let gitignore = workspace_root.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, format!("{entry}\n"))?;
        return Ok(());
    }

    let content = fs::read_to_string(&gitignore)?;
    if content.lines().any(|line| line == entry) {
        return Ok(());
    }

    let mut updated = content;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    fs::write(&gitignore, updated)?;
    Ok(())
}

/// Create every runtime state directory.
pub fn ensure_state_layout(workspace_root: &Path) -> Result<()> {
    let root = state_root(workspace_root);
    for dir in [
        root.clone(),
        root.join("participants"),
        root.join("state").join("cursors"),
        root.join("state").join("delivery"),
        root.join("exchanges"),
        root.join("ui"),
    ] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
