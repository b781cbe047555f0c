//! Turns text selections over narration into translation popups, pausing
//! speech while the popup is open.

use crate::playback::NarrationController;
use crate::settings::LanguagePair;
use crate::speech::SpeechEngine;
use crate::storage::KeyValueStore;
use crate::vocab::{LookupRequest, VocabularyDeck};
use egui::{Pos2, Rect};

/// Vertical gap between the selected text and the popup.
const POPUP_OFFSET: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionInfo {
    pub text: String,
    /// Relative to the top-left corner of the narration container.
    pub anchor: Pos2,
}

/// A finished selection (or a double-clicked word) in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionGesture {
    pub text: String,
    pub rect: Rect,
    pub container: Rect,
    /// The gesture started inside the popup itself.
    pub inside_popup: bool,
}

impl SelectionGesture {
    pub fn new(text: impl Into<String>, rect: Rect, container: Rect) -> Self {
        Self {
            text: text.into(),
            rect,
            container,
            inside_popup: false,
        }
    }

    fn qualifies(&self) -> bool {
        !self.text.trim().is_empty() && !self.inside_popup && self.container.contains(self.rect.center())
    }
}

pub fn popup_anchor(rect: Rect, container: Rect) -> Pos2 {
    Pos2::new(rect.left() - container.left(), rect.bottom() - container.top() + POPUP_OFFSET)
}

/// What a selection over a passive text surface (dialogue, stories) means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassiveSelection {
    /// A single token goes straight into the vocabulary deck.
    AddWord(String),
    Translate(String),
    Ignore,
}

pub fn classify_passive_selection(text: &str) -> PassiveSelection {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        PassiveSelection::Ignore
    } else if trimmed.contains(char::is_whitespace) {
        PassiveSelection::Translate(trimmed.to_string())
    } else {
        PassiveSelection::AddWord(trimmed.to_string())
    }
}

#[derive(Debug, Default)]
pub struct SelectionCoordinator {
    popup: Option<SelectionInfo>,
}

impl SelectionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn popup(&self) -> Option<&SelectionInfo> {
        self.popup.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.popup.is_some()
    }

    /// A selection over narration. Returns whether a popup was opened.
    pub fn on_selection<E: SpeechEngine>(
        &mut self,
        gesture: &SelectionGesture,
        controller: &mut NarrationController<E>,
    ) -> bool {
        if !gesture.qualifies() {
            return false;
        }
        controller.interrupt_for_translation();
        self.open(gesture);
        true
    }

    /// A double-clicked word: always offered to the deck, then translated
    /// in the popup. The returned lookup is the caller's to dispatch.
    pub fn on_double_click<E: SpeechEngine, S: KeyValueStore>(
        &mut self,
        gesture: &SelectionGesture,
        controller: &mut NarrationController<E>,
        deck: &mut VocabularyDeck<S>,
        languages: &LanguagePair,
    ) -> Option<LookupRequest> {
        if gesture.text.trim().is_empty() {
            return None;
        }
        controller.interrupt_for_translation();
        let lookup = deck.begin_add(&gesture.text, languages);
        self.open(gesture);
        lookup
    }

    /// Selection over a surface without narration. Single words are added to
    /// the deck without a popup; longer selections open one. Nothing happens
    /// while a lookup is already running.
    pub fn on_passive_selection<S: KeyValueStore>(
        &mut self,
        gesture: &SelectionGesture,
        deck: &mut VocabularyDeck<S>,
        languages: &LanguagePair,
    ) -> Option<LookupRequest> {
        if !gesture.qualifies() || deck.is_looking_up() {
            return None;
        }
        match classify_passive_selection(&gesture.text) {
            PassiveSelection::AddWord(word) => deck.begin_add(&word, languages),
            PassiveSelection::Translate(_) => {
                self.open(gesture);
                None
            }
            PassiveSelection::Ignore => None,
        }
    }

    /// Closes the popup. Playback resumes only if the popup paused it.
    pub fn close_popup<E: SpeechEngine>(&mut self, controller: &mut NarrationController<E>) {
        self.popup = None;
        controller.resume_after_translation();
    }

    fn open(&mut self, gesture: &SelectionGesture) {
        self.popup = Some(SelectionInfo {
            text: gesture.text.trim().to_string(),
            anchor: popup_anchor(gesture.rect, gesture.container),
        });
    }
}
