//! tmux-backed injector: the one concrete implementation of the router's
//! paste/pane-alive seam.

use std::process::{Command, Stdio};
use std::time::Duration;

use claodex_router::Injector;

const SESSION_NAME: &str = "claodex";

fn run_tmux(args: &[&str]) -> Result<String, String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .map_err(|err| format!("tmux not runnable: {err}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(if stderr.is_empty() {
            format!("tmux command failed: {}", args.join(" "))
        } else {
            stderr
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Settle time between paste and submit. Even with atomic paste-buffer
/// delivery, target TUIs need a moment before accepting C-m as submit;
/// larger payloads need longer.
fn submit_delay(content: &str) -> Duration {
    if let Some(value) = std::env::var("CLAODEX_PASTE_SUBMIT_DELAY_SECONDS")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| (0.0..=10.0).contains(value))
    {
        return Duration::from_secs_f64(value);
    }
    let base = 0.3;
    let extra = content.len().saturating_sub(2000) as f64 / 1000.0 * 0.1;
    Duration::from_secs_f64((base + extra).min(2.0))
}

/// Injects payloads through tmux buffers.
///
/// `load-buffer` from stdin sidesteps the ~16 KB argument limit that
/// `set-buffer` hits on large peer deltas; `paste-buffer -p` skips the
/// bracketed-paste escapes that agent TUIs intercept and mangle.
pub struct TmuxInjector;

impl Injector for TmuxInjector {
    fn paste(&self, pane_handle: &str, payload: &str) -> Result<(), String> {
        use std::io::Write;

        let mut child = Command::new("tmux")
            .args(["load-buffer", "-"])
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| format!("tmux not runnable: {err}"))?;
        child
            .stdin
            .take()
            .ok_or_else(|| "tmux load-buffer stdin unavailable".to_string())?
            .write_all(payload.as_bytes())
            .map_err(|err| format!("tmux load-buffer write failed: {err}"))?;
        let output = child
            .wait_with_output()
            .map_err(|err| format!("tmux load-buffer failed: {err}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(if stderr.is_empty() {
                "tmux load-buffer failed".to_string()
            } else {
                stderr
            });
        }

        run_tmux(&["paste-buffer", "-p", "-t", pane_handle])?;
        std::thread::sleep(submit_delay(payload));
        run_tmux(&["send-keys", "-t", pane_handle, "C-m"])?;
        Ok(())
    }

    fn pane_alive(&self, pane_handle: &str) -> bool {
        let Ok(listing) = run_tmux(&[
            "list-panes",
            "-t",
            SESSION_NAME,
            "-F",
            "#{pane_id} #{pane_dead}",
        ]) else {
            return false;
        };
        for row in listing.lines() {
            let mut parts = row.split_whitespace();
            if let (Some(id), Some(dead)) = (parts.next(), parts.next()) {
                if id == pane_handle {
                    return dead == "0";
                }
            }
        }
        false
    }
}

/// True when the claodex tmux session exists.
pub fn session_exists() -> bool {
    Command::new("tmux")
        .args(["has-session", "-t", SESSION_NAME])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
