//! Caption synchronization and the running transcript.
//!
//! Agent text arrives before the audio it describes. It is held as the
//! pending caption until a chunk is scheduled, then revealed once the host
//! clock reaches that chunk's start, so captions never run ahead of speech.
//!
//! User speech comes back as partial recognitions followed by a final one.
//! Partials overwrite the newest unfinished user entry in place; the final
//! seals it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// `false` only for a user entry still receiving partials.
    pub is_final: bool,
}

/// Append-only conversation log. Only the newest unfinished user entry may
/// be rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Mirror an update published by the synchronizer.
    pub(crate) fn apply(&mut self, index: usize, entry: TranscriptEntry) {
        match self.entries.get_mut(index) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    fn push(&mut self, entry: TranscriptEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    fn open_user_entry(&mut self) -> Option<(usize, &mut TranscriptEntry)> {
        let index = self.entries.len().checked_sub(1)?;
        let last = &mut self.entries[index];
        (last.speaker == Speaker::User && !last.is_final).then_some((index, last))
    }
}

/// One observable change, applied by the session to its view and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionUpdate {
    Entry {
        index: usize,
        entry: TranscriptEntry,
        /// `true` when an existing entry was rewritten rather than appended.
        replaced: bool,
    },
    Live(Option<String>),
}

#[derive(Debug, Default)]
pub struct CaptionSynchronizer {
    pending: Option<String>,
    /// Captions bound to scheduled audio, ordered by start time.
    queued: VecDeque<(f64, String)>,
    live: Option<String>,
    transcript: Transcript,
}

impl CaptionSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn live_caption(&self) -> Option<&str> {
        self.live.as_deref()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Agent text for audio that has not been scheduled yet.
    pub fn on_agent_utterance(&mut self, text: String) {
        if let Some(previous) = self.pending.replace(text) {
            debug!(dropped = previous.as_str(), "pending caption replaced before its audio");
        }
    }

    /// A chunk was placed at `start`. Binds the pending caption to it and
    /// reveals whatever is due at `now`.
    pub fn on_chunk_scheduled(&mut self, start: f64, now: f64) -> Vec<CaptionUpdate> {
        if let Some(text) = self.pending.take() {
            self.queued.push_back((start, text));
        }
        self.poll(now)
    }

    /// Reveal every queued caption whose audio has started.
    pub fn poll(&mut self, now: f64) -> Vec<CaptionUpdate> {
        let mut updates = Vec::new();
        while self.queued.front().is_some_and(|(start, _)| *start <= now) {
            let Some((start, text)) = self.queued.pop_front() else {
                break;
            };
            debug!(start, now, "caption revealed");
            let entry = TranscriptEntry {
                speaker: Speaker::Agent,
                text: text.clone(),
                is_final: true,
            };
            let index = self.transcript.push(entry.clone());
            updates.push(CaptionUpdate::Entry {
                index,
                entry,
                replaced: false,
            });
            updates.extend(self.set_live(Some(text)));
        }
        updates
    }

    pub fn on_partial(&mut self, text: String) -> Vec<CaptionUpdate> {
        let (index, entry, replaced) = match self.transcript.open_user_entry() {
            Some((index, open)) => {
                open.text.clone_from(&text);
                (index, open.clone(), true)
            }
            None => {
                let entry = TranscriptEntry {
                    speaker: Speaker::User,
                    text: text.clone(),
                    is_final: false,
                };
                (self.transcript.push(entry.clone()), entry, false)
            }
        };
        let mut updates = vec![CaptionUpdate::Entry {
            index,
            entry,
            replaced,
        }];
        updates.extend(self.set_live(Some(text)));
        updates
    }

    pub fn on_final(&mut self, text: String) -> Vec<CaptionUpdate> {
        let (index, entry, replaced) = match self.transcript.open_user_entry() {
            Some((index, open)) => {
                open.text = text;
                open.is_final = true;
                (index, open.clone(), true)
            }
            None => {
                let entry = TranscriptEntry {
                    speaker: Speaker::User,
                    text,
                    is_final: true,
                };
                (self.transcript.push(entry.clone()), entry, false)
            }
        };
        let mut updates = vec![CaptionUpdate::Entry {
            index,
            entry,
            replaced,
        }];
        updates.extend(self.set_live(None));
        updates
    }

    /// The user has the floor; the agent's caption comes down.
    pub fn on_turn_released(&mut self) -> Vec<CaptionUpdate> {
        self.set_live(None).into_iter().collect()
    }

    /// The remote abandoned the audio the pending caption was waiting for.
    pub fn drop_pending(&mut self) {
        if let Some(text) = self.pending.take() {
            debug!(dropped = text.as_str(), "pending caption dropped");
        }
    }

    fn set_live(&mut self, text: Option<String>) -> Option<CaptionUpdate> {
        if self.live == text {
            return None;
        }
        self.live.clone_from(&text);
        Some(CaptionUpdate::Live(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(t: &Transcript) -> Vec<(Speaker, &str, bool)> {
        t.entries()
            .iter()
            .map(|e| (e.speaker, e.text.as_str(), e.is_final))
            .collect()
    }

    #[test]
    fn caption_waits_for_its_audio() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("Tell me about yourself.".into());
        assert!(c.transcript().is_empty());

        // Audio queued behind something still playing.
        let updates = c.on_chunk_scheduled(2.0, 1.0);
        assert!(updates.is_empty());
        assert_eq!(c.live_caption(), None);

        assert!(c.poll(1.99).is_empty());
        let updates = c.poll(2.0);
        assert_eq!(updates.len(), 2);
        assert_eq!(c.live_caption(), Some("Tell me about yourself."));
        assert_eq!(
            texts(c.transcript()),
            vec![(Speaker::Agent, "Tell me about yourself.", true)]
        );
    }

    #[test]
    fn caption_for_immediate_audio_is_revealed_at_once() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("Hi".into());
        let updates = c.on_chunk_scheduled(5.0, 5.0);
        assert!(matches!(
            updates[0],
            CaptionUpdate::Entry { index: 0, replaced: false, .. }
        ));
        assert_eq!(updates[1], CaptionUpdate::Live(Some("Hi".into())));
    }

    #[test]
    fn later_chunks_of_the_same_turn_carry_no_caption() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("One caption".into());
        c.on_chunk_scheduled(0.0, 0.0);
        assert!(c.on_chunk_scheduled(1.0, 0.5).is_empty());
        assert!(c.poll(1.5).is_empty());
        assert_eq!(c.transcript().len(), 1);
    }

    #[test]
    fn second_pending_caption_replaces_first() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("first".into());
        c.on_agent_utterance("second".into());
        c.on_chunk_scheduled(0.0, 0.0);
        assert_eq!(texts(c.transcript()), vec![(Speaker::Agent, "second", true)]);
    }

    #[test]
    fn partials_merge_into_one_final_entry() {
        let mut c = CaptionSynchronizer::new();
        c.on_partial("hel".into());
        let updates = c.on_partial("hello".into());
        assert!(matches!(
            updates[0],
            CaptionUpdate::Entry { index: 0, replaced: true, .. }
        ));
        assert_eq!(c.live_caption(), Some("hello"));

        c.on_final("hello world".into());
        assert_eq!(
            texts(c.transcript()),
            vec![(Speaker::User, "hello world", true)]
        );
        assert_eq!(c.live_caption(), None);
    }

    #[test]
    fn final_without_partials_appends() {
        let mut c = CaptionSynchronizer::new();
        c.on_final("yes".into());
        c.on_partial("and".into());
        c.on_final("and also".into());
        assert_eq!(
            texts(c.transcript()),
            vec![
                (Speaker::User, "yes", true),
                (Speaker::User, "and also", true)
            ]
        );
    }

    #[test]
    fn agent_entry_seals_user_partial_position() {
        let mut c = CaptionSynchronizer::new();
        c.on_partial("so".into());
        c.on_agent_utterance("Go on".into());
        c.on_chunk_scheduled(0.0, 0.0);
        c.on_partial("so anyway".into());
        assert_eq!(c.transcript().len(), 3);
        assert_eq!(c.transcript().entries()[0].text, "so");
        assert!(!c.transcript().entries()[0].is_final);
    }

    #[test]
    fn dropped_caption_is_never_shown() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("never spoken".into());
        c.drop_pending();
        assert!(c.on_chunk_scheduled(0.0, 0.0).is_empty());
        assert!(c.transcript().is_empty());
    }

    #[test]
    fn release_clears_live_caption_once() {
        let mut c = CaptionSynchronizer::new();
        c.on_agent_utterance("Question?".into());
        c.on_chunk_scheduled(0.0, 0.0);
        assert_eq!(c.on_turn_released(), vec![CaptionUpdate::Live(None)]);
        assert!(c.on_turn_released().is_empty());
    }
}
