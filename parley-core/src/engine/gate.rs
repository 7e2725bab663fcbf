//! Turn-taking gate.
//!
//! Decides whether captured frames may leave the machine. Only `Capturing`
//! transmits; in every other state frames are dropped on the floor, never
//! queued, so the user's microphone can't pick up agent playback and send it
//! back to the remote.
//!
//! ```text
//!            open_session / agent_started
//!   Idle ───────────────────────────────► AgentSpeaking
//!    ▲                                      │      ▲
//!    │ reset                       release  │      │ agent_started
//!    │                                      ▼      │
//!    └──────────────────────────────────── Capturing
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who currently holds the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    /// No session.
    #[default]
    Idle,
    /// The user's turn: frames are transmitted.
    Capturing,
    /// The agent's turn: frames are dropped.
    AgentSpeaking,
}

#[derive(Debug, Default)]
pub struct TurnGate {
    state: TurnState,
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn permits_transmit(&self) -> bool {
        self.state == TurnState::Capturing
    }

    /// A session just started. The agent opens the conversation, so the gate
    /// starts closed. Returns `true` if the state changed.
    pub fn open_session(&mut self) -> bool {
        self.transition(TurnState::AgentSpeaking, "session opened")
    }

    /// Agent audio or text arrived. Returns `true` if the state changed.
    pub fn agent_started(&mut self) -> bool {
        self.transition(TurnState::AgentSpeaking, "agent speaking")
    }

    /// Hand the floor back to the user.
    ///
    /// Only `AgentSpeaking → Capturing` counts. Returns `false` otherwise, so
    /// a turn is released at most once.
    pub fn release(&mut self) -> bool {
        if self.state != TurnState::AgentSpeaking {
            return false;
        }
        self.transition(TurnState::Capturing, "turn released")
    }

    /// Back to `Idle`. Returns `true` if the state changed.
    pub fn reset(&mut self) -> bool {
        self.transition(TurnState::Idle, "gate reset")
    }

    fn transition(&mut self, next: TurnState, why: &'static str) -> bool {
        if self.state == next {
            return false;
        }
        debug!(from = ?self.state, to = ?next, "{why}");
        self.state = next;
        true
    }
}
