//! Sentence-by-sentence narration over a [`SpeechEngine`].
//!
//! Every request to speak bumps a generation counter, and each utterance is
//! tagged with the generation it belongs to. Events carrying an older
//! generation are dropped, so a completion from a cancelled queue can never
//! advance the current one.

use crate::parsing::segmenter::{segment, sentence_at, SentenceSpan};
use crate::settings::SpeechSettings;
use crate::speech::{SpeechEngine, SpeechEvent, SpeechFailure, SpeechOutcome, Utterance, UtteranceTag};
use crate::types::session::{Message, MessageId};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub active_message: Option<MessageId>,
    /// Kept after a stop so the renderer can leave the last sentence marked.
    pub active_sentence: Option<usize>,
    pub interrupted_for_translation: bool,
}

/// What the renderer should mark inside one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub range: Range<usize>,
    /// Start of the active sentence, only while actually playing.
    pub cursor: Option<usize>,
}

pub struct NarrationController<E: SpeechEngine> {
    engine: E,
    state: PlaybackState,
    generation: u64,
    spans: Vec<SentenceSpan>,
    settings: SpeechSettings,
    language: String,
    /// Paused after a sentence ended but before the next one was spoken.
    between_sentences: bool,
}

impl<E: SpeechEngine> NarrationController<E> {
    pub fn new(engine: E, settings: SpeechSettings, language: impl Into<String>) -> Self {
        Self {
            engine,
            state: PlaybackState::default(),
            generation: 0,
            spans: Vec::new(),
            settings,
            language: language.into(),
            between_sentences: false,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn sentence_count(&self) -> usize {
        self.spans.len()
    }

    /// Takes effect from the next sentence spoken.
    pub fn set_voice_settings(&mut self, settings: SpeechSettings, language: impl Into<String>) {
        self.settings = settings;
        self.language = language.into();
    }

    pub fn play_from_sentence(&mut self, message: &Message, index: usize) {
        self.invalidate();
        self.spans = segment(&message.text);
        self.state.active_message = Some(message.id);
        self.start_at(index);
    }

    pub fn pause(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        self.engine.pause();
        self.state.status = PlaybackStatus::Paused;
    }

    pub fn resume(&mut self) {
        if self.state.status != PlaybackStatus::Paused {
            return;
        }
        self.state.interrupted_for_translation = false;
        if self.between_sentences {
            match self.state.active_sentence {
                Some(index) => self.speak_sentence(index),
                None => self.go_idle(),
            }
            return;
        }
        self.engine.resume();
        self.state.status = PlaybackStatus::Playing;
    }

    pub fn stop(&mut self) {
        self.invalidate();
        self.go_idle();
    }

    /// Pauses for a selection and remembers that the pause was not the
    /// user's own. Does nothing unless currently playing.
    pub fn interrupt_for_translation(&mut self) {
        if self.state.status == PlaybackStatus::Playing {
            self.pause();
            self.state.interrupted_for_translation = true;
        }
    }

    /// Resumes only a pause made by [`interrupt_for_translation`].
    ///
    /// [`interrupt_for_translation`]: Self::interrupt_for_translation
    pub fn resume_after_translation(&mut self) {
        if self.state.interrupted_for_translation {
            self.resume();
            self.state.interrupted_for_translation = false;
        }
    }

    pub fn skip_to(&mut self, index: usize) {
        if self.state.status == PlaybackStatus::Idle || self.state.active_message.is_none() {
            return;
        }
        self.invalidate();
        self.start_at(index);
    }

    pub fn can_skip_next(&self) -> bool {
        self.state.status != PlaybackStatus::Idle
            && self
                .state
                .active_sentence
                .is_some_and(|i| i + 1 < self.spans.len())
    }

    pub fn can_skip_previous(&self) -> bool {
        self.state.status != PlaybackStatus::Idle && self.state.active_sentence.is_some_and(|i| i > 0)
    }

    pub fn skip_next(&mut self) {
        if self.can_skip_next() {
            if let Some(i) = self.state.active_sentence {
                self.skip_to(i + 1);
            }
        }
    }

    pub fn skip_previous(&mut self) {
        if self.can_skip_previous() {
            if let Some(i) = self.state.active_sentence {
                self.skip_to(i - 1);
            }
        }
    }

    /// The play/pause button of one message.
    pub fn toggle(&mut self, message: &Message) {
        if self.state.active_message == Some(message.id) {
            match self.state.status {
                PlaybackStatus::Playing => self.pause(),
                PlaybackStatus::Paused => self.resume(),
                PlaybackStatus::Idle => self.play_from_sentence(message, 0),
            }
        } else {
            self.play_from_sentence(message, 0);
        }
    }

    /// Plays from the sentence containing byte offset `pos`, if any.
    pub fn play_at(&mut self, message: &Message, pos: usize) {
        let spans = segment(&message.text);
        if let Some(index) = sentence_at(&spans, pos) {
            self.play_from_sentence(message, index);
        }
    }

    pub fn highlight(&self, message_id: MessageId) -> Option<Highlight> {
        if self.state.active_message != Some(message_id) {
            return None;
        }
        let span = self.spans.get(self.state.active_sentence?)?;
        let cursor = (self.state.status == PlaybackStatus::Playing).then_some(span.start);
        Some(Highlight {
            range: span.range(),
            cursor,
        })
    }

    /// Applies every event the engine has produced since the last call.
    pub fn pump(&mut self) {
        for event in self.engine.poll_events() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: SpeechEvent) {
        if event.tag.generation != self.generation {
            tracing::trace!(
                event_generation = event.tag.generation,
                current = self.generation,
                "ignoring speech event from an earlier request"
            );
            return;
        }
        if self.state.status == PlaybackStatus::Idle || self.state.active_sentence != Some(event.tag.sentence) {
            return;
        }
        match event.outcome {
            SpeechOutcome::Finished => {
                let next = event.tag.sentence + 1;
                if next < self.spans.len() && self.state.status == PlaybackStatus::Paused {
                    self.state.active_sentence = Some(next);
                    self.between_sentences = true;
                } else if next < self.spans.len() {
                    self.speak_sentence(next);
                } else {
                    tracing::debug!(message = ?self.state.active_message, "narration finished");
                    self.go_idle();
                }
            }
            SpeechOutcome::Failed(SpeechFailure::Interrupted) => {}
            SpeechOutcome::Failed(SpeechFailure::Other(reason)) => {
                tracing::warn!(%reason, "speech synthesis failed");
                self.go_idle();
            }
        }
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.between_sentences = false;
        self.engine.cancel();
    }

    fn go_idle(&mut self) {
        self.between_sentences = false;
        self.state.status = PlaybackStatus::Idle;
        self.state.interrupted_for_translation = false;
    }

    fn start_at(&mut self, index: usize) {
        if index >= self.spans.len() {
            self.stop();
            return;
        }
        self.state.interrupted_for_translation = false;
        self.speak_sentence(index);
    }

    fn speak_sentence(&mut self, index: usize) {
        let Some(span) = self.spans.get(index) else {
            self.go_idle();
            return;
        };
        let utterance = Utterance {
            tag: UtteranceTag {
                generation: self.generation,
                sentence: index,
            },
            text: span.text.clone(),
            voice_id: self.settings.voice_id.clone(),
            language: self.language.clone(),
            rate: self.settings.rate,
        };
        self.between_sentences = false;
        self.state.status = PlaybackStatus::Playing;
        self.state.active_sentence = Some(index);
        if let Err(e) = self.engine.speak(utterance) {
            tracing::warn!(error = %e, "could not start speech");
            self.go_idle();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SpeechError;
    use crate::speech::Voice;

    /// Records what it was asked to say. Completions are injected by the
    /// test through `finish_current`.
    #[derive(Default)]
    pub(crate) struct ScriptedEngine {
        pub spoken: Vec<Utterance>,
        pub events: Vec<SpeechEvent>,
        pub paused: bool,
        pub cancels: usize,
        pub fail_next_speak: bool,
        current: Option<UtteranceTag>,
    }

    impl ScriptedEngine {
        pub(crate) fn finish_current(&mut self) {
            if let Some(tag) = self.current.take() {
                self.events.push(SpeechEvent {
                    tag,
                    outcome: SpeechOutcome::Finished,
                });
            }
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn voices(&mut self) -> Vec<Voice> {
            Vec::new()
        }

        fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
            if self.fail_next_speak {
                self.fail_next_speak = false;
                return Err(SpeechError::Unavailable("scripted failure".to_string()));
            }
            self.current = Some(utterance.tag);
            self.spoken.push(utterance);
            Ok(())
        }

        fn pause(&mut self) {
            self.paused = true;
        }

        fn resume(&mut self) {
            self.paused = false;
        }

        fn cancel(&mut self) {
            self.cancels += 1;
            if let Some(tag) = self.current.take() {
                self.events.push(SpeechEvent {
                    tag,
                    outcome: SpeechOutcome::Failed(SpeechFailure::Interrupted),
                });
            }
        }

        fn poll_events(&mut self) -> Vec<SpeechEvent> {
            std::mem::take(&mut self.events)
        }
    }

    pub(crate) fn controller() -> NarrationController<ScriptedEngine> {
        NarrationController::new(ScriptedEngine::default(), SpeechSettings::default(), "en")
    }

    fn narration() -> Message {
        Message::narrator(7, "You enter a cave. It is dark! Water drips. What do you do?", None)
    }

    fn spoken_texts(c: &NarrationController<ScriptedEngine>) -> Vec<&str> {
        c.engine().spoken.iter().map(|u| u.text.as_str()).collect()
    }

    #[test]
    fn plays_every_sentence_then_goes_idle() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        assert_eq!(c.status(), PlaybackStatus::Playing);
        for _ in 0..4 {
            c.engine_mut().finish_current();
            c.pump();
        }
        assert_eq!(
            spoken_texts(&c),
            vec!["You enter a cave.", "It is dark!", "Water drips.", "What do you do?"]
        );
        assert_eq!(c.status(), PlaybackStatus::Idle);
        assert_eq!(c.state().active_sentence, Some(3));
    }

    #[test]
    fn stale_completion_does_not_advance_a_newer_request() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        let stale = c.engine().spoken[0].tag;

        c.play_from_sentence(&msg, 2);
        c.handle_event(SpeechEvent {
            tag: stale,
            outcome: SpeechOutcome::Finished,
        });
        c.pump();

        assert_eq!(c.state().active_sentence, Some(2));
        assert_eq!(spoken_texts(&c), vec!["You enter a cave.", "Water drips."]);
        assert_eq!(c.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn out_of_range_start_stops() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 9);
        assert_eq!(c.status(), PlaybackStatus::Idle);
        assert!(c.engine().spoken.is_empty());
    }

    #[test]
    fn pause_resume_and_stop_keep_the_sentence() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 1);
        c.pause();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert!(c.engine().paused);
        c.resume();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert!(!c.engine().paused);
        c.stop();
        assert_eq!(c.status(), PlaybackStatus::Idle);
        assert_eq!(c.state().active_sentence, Some(1));
        // Cancelling produced an interrupted event that must be ignored.
        c.pump();
        assert_eq!(c.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn sentence_ending_during_a_pause_waits_for_resume() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        c.engine_mut().finish_current();
        c.pause();
        c.pump();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert_eq!(c.state().active_sentence, Some(1));
        assert_eq!(c.engine().spoken.len(), 1);

        c.resume();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert_eq!(spoken_texts(&c), vec!["You enter a cave.", "It is dark!"]);
    }

    #[test]
    fn sentence_ending_during_a_translation_pause_stays_interrupted() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        c.engine_mut().finish_current();
        c.interrupt_for_translation();
        c.pump();
        assert_eq!(c.status(), PlaybackStatus::Paused);
        assert!(c.state().interrupted_for_translation);
        assert_eq!(c.engine().spoken.len(), 1);

        c.resume_after_translation();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert!(!c.state().interrupted_for_translation);
        assert_eq!(c.engine().spoken.last().unwrap().text, "It is dark!");
    }

    #[test]
    fn last_sentence_ending_during_a_pause_goes_idle() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 3);
        c.engine_mut().finish_current();
        c.pause();
        c.pump();
        assert_eq!(c.status(), PlaybackStatus::Idle);
        c.resume();
        assert_eq!(c.engine().spoken.len(), 1);
    }

    #[test]
    fn skipping_is_bounded_and_disabled_when_idle() {
        let mut c = controller();
        let msg = narration();
        c.skip_next();
        assert!(c.engine().spoken.is_empty());

        c.play_from_sentence(&msg, 0);
        assert!(!c.can_skip_previous());
        c.skip_next();
        assert_eq!(c.state().active_sentence, Some(1));
        c.skip_to(3);
        assert!(!c.can_skip_next());
        c.skip_next();
        assert_eq!(c.state().active_sentence, Some(3));
        c.skip_previous();
        assert_eq!(c.state().active_sentence, Some(2));
    }

    #[test]
    fn toggle_follows_play_pause_button_rules() {
        let mut c = controller();
        let first = narration();
        let second = Message::narrator(8, "Another tale. The end.", None);

        c.toggle(&first);
        assert_eq!(c.status(), PlaybackStatus::Playing);
        c.toggle(&first);
        assert_eq!(c.status(), PlaybackStatus::Paused);
        c.toggle(&first);
        assert_eq!(c.status(), PlaybackStatus::Playing);

        c.toggle(&second);
        assert_eq!(c.state().active_message, Some(8));
        assert_eq!(c.state().active_sentence, Some(0));
    }

    #[test]
    fn click_plays_the_sentence_under_the_position() {
        let mut c = controller();
        let msg = narration();
        let pos = msg.text.find("Water").unwrap();
        c.play_at(&msg, pos);
        assert_eq!(c.state().active_sentence, Some(2));
        c.play_at(&msg, 10_000);
        assert_eq!(c.state().active_sentence, Some(2));
    }

    #[test]
    fn highlight_cursor_only_while_playing() {
        let mut c = controller();
        let msg = narration();
        assert!(c.highlight(msg.id).is_none());
        c.play_from_sentence(&msg, 1);
        let playing = c.highlight(msg.id).unwrap();
        assert_eq!(&msg.text[playing.range.clone()].trim(), &"It is dark!");
        assert_eq!(playing.cursor, Some(playing.range.start));
        c.pause();
        assert_eq!(c.highlight(msg.id).unwrap().cursor, None);
        assert!(c.highlight(99).is_none());
    }

    #[test]
    fn translation_interruption_only_resumes_its_own_pause() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        c.interrupt_for_translation();
        assert!(c.state().interrupted_for_translation);
        c.resume_after_translation();
        assert_eq!(c.status(), PlaybackStatus::Playing);
        assert!(!c.state().interrupted_for_translation);

        c.pause();
        c.interrupt_for_translation();
        assert!(!c.state().interrupted_for_translation);
        c.resume_after_translation();
        assert_eq!(c.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn failures_other_than_interruption_go_idle() {
        let mut c = controller();
        let msg = narration();
        c.play_from_sentence(&msg, 0);
        let tag = c.engine().spoken[0].tag;
        c.handle_event(SpeechEvent {
            tag,
            outcome: SpeechOutcome::Failed(SpeechFailure::Interrupted),
        });
        assert_eq!(c.status(), PlaybackStatus::Playing);
        c.handle_event(SpeechEvent {
            tag,
            outcome: SpeechOutcome::Failed(SpeechFailure::Other("audio device lost".into())),
        });
        assert_eq!(c.status(), PlaybackStatus::Idle);

        c.engine_mut().fail_next_speak = true;
        c.play_from_sentence(&msg, 0);
        assert_eq!(c.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn utterances_carry_voice_settings() {
        let mut c = controller();
        c.set_voice_settings(
            SpeechSettings {
                voice_id: Some("en-gb".to_string()),
                rate: 1.5,
            },
            "en",
        );
        c.play_from_sentence(&narration(), 0);
        let u = &c.engine().spoken[0];
        assert_eq!(u.voice_id.as_deref(), Some("en-gb"));
        assert_eq!(u.rate, 1.5);
        assert_eq!(u.language, "en");
    }
}
