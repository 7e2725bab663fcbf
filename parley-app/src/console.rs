//! Terminal rendering of engine events.

use std::sync::Arc;

use parley_core::{
    CaptionEvent, ParleyEngine, Speaker, TranscriptEvent, TurnState, TurnStateEvent,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub fn turn_line(event: &TurnStateEvent) -> Option<&'static str> {
    match event.state {
        TurnState::Capturing => Some("── your turn, speak now ──"),
        TurnState::AgentSpeaking => Some("── agent speaking ──"),
        TurnState::Idle => None,
    }
}

/// Only settled entries are printed; partials show up as live captions.
pub fn transcript_line(event: &TranscriptEvent) -> Option<String> {
    if !event.entry.is_final {
        return None;
    }
    let who = match event.entry.speaker {
        Speaker::Agent => "agent",
        Speaker::User => "you",
    };
    Some(format!("{who:>5}: {}", event.entry.text))
}

pub fn caption_line(event: &CaptionEvent) -> Option<String> {
    event.text.as_ref().map(|t| format!("   ...  {t}"))
}

async fn print_each<T: Clone>(
    mut rx: broadcast::Receiver<T>,
    render: impl Fn(&T) -> Option<String>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = render(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "console lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Print turns, settled transcript entries and user partials until aborted.
pub fn spawn(engine: &Arc<ParleyEngine>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(print_each(engine.subscribe_turns(), |e| {
            turn_line(e).map(str::to_string)
        })),
        tokio::spawn(print_each(engine.subscribe_transcripts(), transcript_line)),
        tokio::spawn(print_each(engine.subscribe_captions(), caption_line)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::TranscriptEntry;

    fn entry_event(speaker: Speaker, text: &str, is_final: bool) -> TranscriptEvent {
        TranscriptEvent {
            seq: 0,
            index: 0,
            entry: TranscriptEntry {
                speaker,
                text: text.into(),
                is_final,
            },
            replaced: false,
        }
    }

    #[test]
    fn partial_entries_are_not_printed() {
        assert_eq!(transcript_line(&entry_event(Speaker::User, "hel", false)), None);
        assert_eq!(
            transcript_line(&entry_event(Speaker::User, "hello", true)).as_deref(),
            Some("  you: hello")
        );
        assert_eq!(
            transcript_line(&entry_event(Speaker::Agent, "Hi", true)).as_deref(),
            Some("agent: Hi")
        );
    }

    #[test]
    fn idle_turn_is_silent() {
        assert!(turn_line(&TurnStateEvent {
            state: TurnState::Idle
        })
        .is_none());
        assert_eq!(caption_line(&CaptionEvent { text: None }), None);
    }
}
