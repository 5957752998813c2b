use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ClaodexError;

/// One of the two participating agents. The set is closed: routing logic
/// relies on `peer` being an involution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Claude,
    Codex,
}

impl Agent {
    pub const ALL: [Agent; 2] = [Agent::Claude, Agent::Codex];

    /// The opposite agent.
    pub fn peer(self) -> Agent {
        match self {
            Agent::Claude => Agent::Codex,
            Agent::Codex => Agent::Claude,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Agent::Claude => "claude",
            Agent::Codex => "codex",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = ClaodexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Agent::Claude),
            "codex" => Ok(Agent::Codex),
            other => Err(ClaodexError::Validation(format!(
                "unsupported agent: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_is_involution() {
        for agent in Agent::ALL {
            assert_eq!(agent.peer().peer(), agent);
            assert_ne!(agent.peer(), agent);
        }
    }

    #[test]
    fn parse_round_trips() {
        assert_eq!("claude".parse::<Agent>().unwrap(), Agent::Claude);
        assert_eq!("codex".parse::<Agent>().unwrap(), Agent::Codex);
        assert_eq!(Agent::Claude.to_string(), "claude");
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("gemini".parse::<Agent>().is_err());
        assert!("Claude".parse::<Agent>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Agent::Codex).unwrap(), r#""codex""#);
        let back: Agent = serde_json::from_str(r#""claude""#).unwrap();
        assert_eq!(back, Agent::Claude);
    }
}
