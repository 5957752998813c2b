use std::path::PathBuf;
use std::time::Duration;

/// Default seconds between poll ticks.
const DEFAULT_POLL_SECONDS: f64 = 0.5;
/// Default turn-detection deadline.
const DEFAULT_TURN_TIMEOUT_SECONDS: u64 = 18_000;
/// Default routed turns per collab.
pub const DEFAULT_COLLAB_TURNS: u32 = 10;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Runtime configuration from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval: Duration,
    pub turn_timeout: Duration,
    pub claude_debug_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let poll_seconds =
            env_parse::<f64>("CLAODEX_POLL_SECONDS").unwrap_or(DEFAULT_POLL_SECONDS);
        let timeout_seconds = env_parse::<u64>("CLAODEX_TURN_TIMEOUT_SECONDS")
            .unwrap_or(DEFAULT_TURN_TIMEOUT_SECONDS);
        let claude_debug_dir = std::env::var("CLAODEX_CLAUDE_DEBUG_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|home| home.join(".claude").join("debug")))
            .unwrap_or_else(|| PathBuf::from(".claude/debug"));

        Config {
            poll_interval: Duration::from_secs_f64(poll_seconds.max(0.05)),
            turn_timeout: Duration::from_secs(timeout_seconds.max(1)),
            claude_debug_dir,
        }
    }

    pub fn routing(&self) -> claodex_router::RoutingConfig {
        claodex_router::RoutingConfig {
            poll_interval: self.poll_interval,
            turn_timeout: self.turn_timeout,
            claude_debug_dir: self.claude_debug_dir.clone(),
        }
    }
}
