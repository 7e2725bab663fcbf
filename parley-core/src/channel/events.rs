//! Structured text events received on the channel.
//!
//! Every text frame is a JSON object tagged by `type`. The set is closed:
//!
//! | `type`                   | legacy alias       | payload                       |
//! |--------------------------|--------------------|-------------------------------|
//! | `agent_utterance`        | `ai_response`      | `text`, `is_final_turn?` (`is_final`) |
//! | `transcript_partial`     | `stt_partial`      | `text`                        |
//! | `transcript_final`       | `stt_final`        | `text`                        |
//! | `agent_audio_cancelled`  | `audio_cancelled`  | (none)                        |
//!
//! Anything else is rejected and the caller ignores it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Agent text for the audio that follows. Shown once that audio plays.
    #[serde(alias = "ai_response")]
    AgentUtterance {
        text: String,
        #[serde(default, alias = "is_final", skip_serializing_if = "Option::is_none")]
        is_final_turn: Option<bool>,
    },
    /// In-progress recognition of the user's current utterance.
    #[serde(alias = "stt_partial")]
    TranscriptPartial { text: String },
    /// Completed recognition of the user's utterance.
    #[serde(alias = "stt_final")]
    TranscriptFinal { text: String },
    /// The remote abandoned synthesis of the current agent turn.
    #[serde(alias = "audio_cancelled")]
    AgentAudioCancelled,
}

impl InboundEvent {
    /// Whether this utterance closes the whole conversation.
    pub fn is_final_turn(&self) -> bool {
        matches!(
            self,
            InboundEvent::AgentUtterance {
                is_final_turn: Some(true),
                ..
            }
        )
    }
}

/// Why a text payload was not turned into an [`InboundEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// Not JSON, not an object, no string `type`, or missing fields.
    Malformed(String),
    /// Well-formed but outside the closed event set.
    UnknownKind(String),
}

const KNOWN_KINDS: &[&str] = &[
    "agent_utterance",
    "ai_response",
    "transcript_partial",
    "stt_partial",
    "transcript_final",
    "stt_final",
    "agent_audio_cancelled",
    "audio_cancelled",
];

pub fn classify_inbound(text: &str) -> Result<InboundEvent, Rejected> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Rejected::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Rejected::Malformed("missing string `type`".into()))?;
    if !KNOWN_KINDS.contains(&kind) {
        return Err(Rejected::UnknownKind(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| Rejected::Malformed(e.to_string()))
}

/// Parse one text frame, or `None` if it should be ignored.
pub fn parse_inbound(text: &str) -> Option<InboundEvent> {
    classify_inbound(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_kinds() {
        assert_eq!(
            parse_inbound(r#"{"type":"agent_utterance","text":"Hi there","is_final_turn":true}"#),
            Some(InboundEvent::AgentUtterance {
                text: "Hi there".into(),
                is_final_turn: Some(true),
            })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"transcript_partial","text":"hel"}"#),
            Some(InboundEvent::TranscriptPartial { text: "hel".into() })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"transcript_final","text":"hello"}"#),
            Some(InboundEvent::TranscriptFinal {
                text: "hello".into()
            })
        );
    }

    #[test]
    fn accepts_legacy_aliases() {
        let ev = parse_inbound(r#"{"type":"ai_response","text":"Bye","is_final":true}"#).unwrap();
        assert!(ev.is_final_turn());
        assert_eq!(
            parse_inbound(r#"{"type":"stt_final","text":"ok"}"#),
            Some(InboundEvent::TranscriptFinal { text: "ok".into() })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"audio_cancelled"}"#),
            Some(InboundEvent::AgentAudioCancelled)
        );
    }

    #[test]
    fn final_turn_defaults_to_false() {
        let ev = parse_inbound(r#"{"type":"agent_utterance","text":"Next question"}"#).unwrap();
        assert!(!ev.is_final_turn());
        let ev = parse_inbound(r#"{"type":"agent_utterance","text":"x","is_final_turn":null}"#)
            .unwrap();
        assert!(!ev.is_final_turn());
    }

    #[test]
    fn unknown_kinds_are_distinguished_from_garbage() {
        assert_eq!(
            classify_inbound(r#"{"type":"audio_meta","mime":"audio/wav"}"#),
            Err(Rejected::UnknownKind("audio_meta".into()))
        );
        assert!(matches!(
            classify_inbound("{not json"),
            Err(Rejected::Malformed(_))
        ));
        assert!(matches!(
            classify_inbound(r#"["agent_utterance"]"#),
            Err(Rejected::Malformed(_))
        ));
        assert!(matches!(
            classify_inbound(r#"{"type":"transcript_final"}"#),
            Err(Rejected::Malformed(_))
        ));
    }
}
