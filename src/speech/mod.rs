//! The speech-synthesis capability. Engines speak one utterance at a time
//! and report completions as events the caller polls for.

pub mod command;

use crate::error::SpeechError;

pub use command::CommandSpeech;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub name: String,
    /// BCP-47-ish tag, e.g. `en-us`.
    pub language: String,
}

impl Voice {
    pub fn matches_language(&self, prefix: &str) -> bool {
        self.language
            .to_ascii_lowercase()
            .starts_with(&prefix.to_ascii_lowercase())
    }
}

pub fn voices_for_language<'a>(voices: &'a [Voice], prefix: &str) -> Vec<&'a Voice> {
    voices.iter().filter(|v| v.matches_language(prefix)).collect()
}

/// Identifies which playback request and which sentence an utterance
/// belongs to, so late events can be matched against the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceTag {
    pub generation: u64,
    pub sentence: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub tag: UtteranceTag,
    pub text: String,
    pub voice_id: Option<String>,
    /// Fallback language when no voice is chosen.
    pub language: String,
    pub rate: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFailure {
    /// The utterance was cancelled on purpose.
    Interrupted,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Finished,
    Failed(SpeechFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechEvent {
    pub tag: UtteranceTag,
    pub outcome: SpeechOutcome,
}

pub trait SpeechEngine {
    fn voices(&mut self) -> Vec<Voice>;

    /// Starts speaking, replacing anything currently spoken.
    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stops the current utterance. Engines report it as `Interrupted`.
    fn cancel(&mut self);

    fn poll_events(&mut self) -> Vec<SpeechEvent>;
}
