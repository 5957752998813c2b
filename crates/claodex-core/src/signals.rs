//! Routing signals an agent may emit on the last line of a response.

/// Hands control to the collab orchestrator.
pub const COLLAB_SIGNAL: &str = "[COLLAB]";
/// One half of the two-turn convergence handshake.
pub const CONVERGE_SIGNAL: &str = "[CONVERGED]";

/// True when the last non-empty line of `text` equals `signal`.
pub fn last_line_is(text: &str, signal: &str) -> bool {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line == signal)
}

/// Remove the last non-empty line when it matches `signal`.
pub fn strip_trailing_signal(text: &str, signal: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    for index in (0..lines.len()).rev() {
        if lines[index].trim().is_empty() {
            continue;
        }
        if lines[index].trim() == signal {
            lines.remove(index);
        }
        break;
    }
    lines.join("\n").trim_end().to_string()
}

/// Strip all trailing routing signals, looping so stacking and order do not
/// matter. Used when transcribing bodies into the exchange log.
pub fn strip_routing_signals(text: &str) -> String {
    let mut result = text.trim_end().to_string();
    loop {
        let mut changed = false;
        for signal in [COLLAB_SIGNAL, CONVERGE_SIGNAL] {
            let stripped = strip_trailing_signal(&result, signal);
            if stripped != result {
                result = stripped.trim_end().to_string();
                changed = true;
            }
        }
        if !changed {
            return result;
        }
    }
}
