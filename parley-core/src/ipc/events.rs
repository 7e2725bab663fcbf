//! Events broadcast by [`crate::ParleyEngine`] to host UIs.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `TurnStateEvent` | `subscribe_turns()` |
//! | `TranscriptEvent` | `subscribe_transcripts()` |
//! | `CaptionEvent` | `subscribe_captions()` |
//! | `EngineStatusEvent` | `subscribe_status()` |

use serde::{Deserialize, Serialize};

use crate::engine::{captions::TranscriptEntry, gate::TurnState};

// ---------------------------------------------------------------------------
// Turn events
// ---------------------------------------------------------------------------

/// Emitted on every turn-gate transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStateEvent {
    pub state: TurnState,
}

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Emitted when a transcript entry is appended or rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Position of the entry in the session transcript.
    pub index: usize,
    pub entry: TranscriptEntry,
    /// `true` when the entry at `index` already existed (partial merge).
    pub replaced: bool,
}

/// Emitted when the live caption changes. `None` clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionEvent {
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Set when the status change ended a session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle of the engine's current (or last) session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No session has been started.
    #[default]
    Idle,
    /// Opening the channel and the audio graph.
    Connecting,
    /// Session running.
    Active,
    /// Session ended by the user or the remote closing the channel.
    Stopped,
    /// Session ended after the agent's final turn.
    Completed,
    /// Session failed to start or the channel failed.
    Error,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    UserStopped,
    ChannelClosed,
    ChannelFailed,
    Completed,
}

impl EndReason {
    pub fn status(self) -> EngineStatus {
        match self {
            EndReason::UserStopped | EndReason::ChannelClosed => EngineStatus::Stopped,
            EndReason::ChannelFailed => EngineStatus::Error,
            EndReason::Completed => EngineStatus::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::captions::Speaker;

    #[test]
    fn transcript_event_serializes_with_camel_case_and_lowercase_speaker() {
        let event = TranscriptEvent {
            seq: 4,
            index: 2,
            entry: TranscriptEntry {
                speaker: Speaker::User,
                text: "hello".into(),
                is_final: false,
            },
            replaced: true,
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["index"], 2);
        assert_eq!(json["entry"]["speaker"], "user");
        assert_eq!(json["entry"]["isFinal"], false);
        assert_eq!(json["replaced"], true);

        let round_trip: TranscriptEvent =
            serde_json::from_value(json).expect("deserialize transcript event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_event_carries_end_reason() {
        let event = EngineStatusEvent {
            status: EndReason::Completed.status(),
            reason: Some(EndReason::Completed),
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["reason"], "completed");
        assert!(json["detail"].is_null());

        let connecting = EngineStatusEvent {
            status: EngineStatus::Connecting,
            reason: None,
            detail: None,
        };
        let json = serde_json::to_value(&connecting).expect("serialize status event");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn end_reasons_map_to_statuses() {
        assert_eq!(EndReason::UserStopped.status(), EngineStatus::Stopped);
        assert_eq!(EndReason::ChannelClosed.status(), EngineStatus::Stopped);
        assert_eq!(EndReason::ChannelFailed.status(), EngineStatus::Error);
        assert_eq!(
            serde_json::to_value(EndReason::ChannelFailed).unwrap(),
            "channelFailed"
        );
    }

    #[test]
    fn turn_state_event_uses_lowercase_state() {
        let json = serde_json::to_value(TurnStateEvent {
            state: TurnState::AgentSpeaking,
        })
        .unwrap();
        assert_eq!(json["state"], "agentspeaking");
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<EngineStatus>(r#""Active""#).is_err());
    }
}
