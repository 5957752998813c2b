//! Line-event stream consumed by the REPL and, during collab, by the halt
//! listener. The reader thread is the only stdin owner; everything else
//! sees `InputEvent`s through the hub.

use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One event from the line editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Submit(String),
    ToggleTarget,
    Idle,
    Quit,
}

/// Hands out input events with an idle tick: `next` returns `Idle` when no
/// line arrives within the interval, which drives the pending-watch poller
/// without blocking input.
pub struct InputHub {
    rx: Mutex<Receiver<InputEvent>>,
}

impl InputHub {
    /// Spawn the stdin reader thread. EOF becomes `Quit`.
    pub fn spawn_stdin() -> Arc<InputHub> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("claodex-stdin".to_string())
            .spawn(move || read_stdin_lines(tx))
            .expect("spawn stdin reader");
        Arc::new(InputHub { rx: Mutex::new(rx) })
    }

    /// Build a hub over an arbitrary event source (tests, alternative
    /// editors).
    pub fn from_receiver(rx: Receiver<InputEvent>) -> Arc<InputHub> {
        Arc::new(InputHub { rx: Mutex::new(rx) })
    }

    /// Next event, or `Idle` after `idle_after` without one. A disconnected
    /// source reads as `Quit`.
    pub fn next(&self, idle_after: Duration) -> InputEvent {
        let rx = self.rx.lock().expect("input hub mutex poisoned");
        match rx.recv_timeout(idle_after) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => InputEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => InputEvent::Quit,
        }
    }
}

fn read_stdin_lines(tx: Sender<InputEvent>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let event = match line.trim() {
            "/switch" => InputEvent::ToggleTarget,
            _ => InputEvent::Submit(line),
        };
        if tx.send(event).is_err() {
            return;
        }
    }
    let _ = tx.send(InputEvent::Quit);
}

/// Whitespace-delimited word count, reported in `recv` events.
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
