//! The learner's vocabulary deck and its flashcard cursor.

use crate::backend::GenerativeBackend;
use crate::error::BackendError;
use crate::modes::translation::try_translate;
use crate::settings::LanguagePair;
use crate::storage::{load_json, save_json, KeyValueStore, VOCABULARY_KEY};
use serde::{Deserialize, Serialize};

const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\''];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VocabEntry {
    pub id: u64,
    pub word: String,
    pub translation: String,
}

/// Lowercases, trims and drops a single trailing punctuation mark.
pub fn normalize_word(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut chars = lowered.chars();
    match chars.next_back() {
        Some(last) if TRAILING_PUNCTUATION.contains(&last) => chars.as_str().to_string(),
        _ => lowered,
    }
}

/// A pending translation lookup for one word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    epoch: u64,
    pub word: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug)]
pub struct LookupReply {
    epoch: u64,
    pub word: String,
    pub result: Result<String, BackendError>,
}

impl LookupRequest {
    pub fn run(self, backend: &dyn GenerativeBackend) -> LookupReply {
        let result = try_translate(backend, &self.word, &self.from, &self.to);
        LookupReply {
            epoch: self.epoch,
            word: self.word,
            result,
        }
    }
}

pub struct VocabularyDeck<S: KeyValueStore> {
    store: S,
    entries: Vec<VocabEntry>,
    pending: Option<String>,
    epoch: u64,
}

impl<S: KeyValueStore> VocabularyDeck<S> {
    /// Loads the persisted deck. Corrupt data starts an empty deck.
    pub fn load(mut store: S) -> Self {
        let entries: Vec<VocabEntry> = load_json(&mut store, VOCABULARY_KEY).unwrap_or_default();
        tracing::debug!(words = entries.len(), "vocabulary loaded");
        Self {
            store,
            entries,
            pending: None,
            epoch: 0,
        }
    }

    pub fn entries(&self) -> &[VocabEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        let word = normalize_word(word);
        self.entries.iter().any(|e| e.word == word)
    }

    pub fn is_looking_up(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_word(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Starts adding a word. Returns `None` when there is nothing to do: an
    /// empty or already-known word, or another lookup still running.
    pub fn begin_add(&mut self, raw: &str, languages: &LanguagePair) -> Option<LookupRequest> {
        let word = normalize_word(raw);
        if word.is_empty() || self.pending.is_some() || self.entries.iter().any(|e| e.word == word) {
            return None;
        }
        self.pending = Some(word.clone());
        Some(LookupRequest {
            epoch: self.epoch,
            word,
            from: languages.learning.clone(),
            to: languages.native.clone(),
        })
    }

    /// Applies a finished lookup. Returns whether an entry was added.
    pub fn finish_add(&mut self, reply: LookupReply) -> bool {
        if reply.epoch != self.epoch {
            tracing::debug!(word = %reply.word, "dropping lookup for a cleared deck");
            return false;
        }
        if self.pending.as_deref() == Some(reply.word.as_str()) {
            self.pending = None;
        }
        let translation = match reply.result {
            Ok(translation) => translation.trim().to_string(),
            Err(e) => {
                tracing::warn!(word = %reply.word, error = %e, "vocabulary lookup failed");
                return false;
            }
        };
        if translation.is_empty()
            || translation.to_lowercase() == reply.word.to_lowercase()
            || self.entries.iter().any(|e| e.word == reply.word)
        {
            return false;
        }
        let id = self.entries.iter().map(|e| e.id).max().map_or(1, |id| id + 1);
        self.entries.insert(
            0,
            VocabEntry {
                id,
                word: reply.word,
                translation,
            },
        );
        self.persist();
        true
    }

    /// Looks the word up on the calling thread.
    pub fn add_word(&mut self, raw: &str, languages: &LanguagePair, backend: &dyn GenerativeBackend) -> bool {
        match self.begin_add(raw, languages) {
            Some(request) => {
                let reply = request.run(backend);
                self.finish_add(reply)
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u64) {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() != before {
            self.persist();
        }
    }

    /// Empties the deck. Lookups already running are dropped when they land.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending = None;
        self.epoch += 1;
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(e) = save_json(&mut self.store, VOCABULARY_KEY, &self.entries) {
            tracing::warn!(error = %e, "failed to save vocabulary");
        }
    }
}

/// Cursor over the deck for flashcard review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flashcards {
    pub index: usize,
    pub flipped: bool,
}

impl Flashcards {
    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
    }

    pub fn next(&mut self, len: usize) {
        if len <= 1 {
            return;
        }
        self.flipped = false;
        self.index = (self.index + 1) % len;
    }

    pub fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.index = 0;
        } else if self.index >= len {
            self.index = len - 1;
        }
    }

    pub fn current<'a, S: KeyValueStore>(&self, deck: &'a VocabularyDeck<S>) -> Option<&'a VocabEntry> {
        deck.entries().get(self.index)
    }

    pub fn remove_current<S: KeyValueStore>(&mut self, deck: &mut VocabularyDeck<S>) {
        if let Some(id) = self.current(deck).map(|e| e.id) {
            self.flipped = false;
            deck.remove(id);
            self.clamp(deck.len());
        }
    }
}
