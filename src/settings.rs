use crate::error::StorageError;
use crate::speech::Voice;
use crate::storage::{KeyValueStore, LEARNING_LANG_KEY, NATIVE_LANG_KEY, RATE_KEY, VOICE_KEY};

pub const SUPPORTED_LANGUAGES: [(&str, &str); 8] = [
    ("en", "English"),
    ("pt", "Português"),
    ("es", "Español"),
    ("fr", "Français"),
    ("de", "Deutsch"),
    ("it", "Italiano"),
    ("ja", "日本語"),
    ("ko", "한국어"),
];

pub const DEFAULT_NATIVE_LANG: &str = "pt";
pub const DEFAULT_LEARNING_LANG: &str = "en";

pub const DEFAULT_RATE: f32 = 0.8;
pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

/// Display name for a language code; unknown codes are shown as-is.
pub fn language_name(code: &str) -> &str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(code, |(_, name)| *name)
}

pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.iter().any(|(c, _)| *c == code)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub voice_id: Option<String>,
    pub rate: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice_id: None,
            rate: DEFAULT_RATE,
        }
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        DEFAULT_RATE
    }
}

impl SpeechSettings {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let voice_id = store
            .get(VOICE_KEY)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let rate = store
            .get(RATE_KEY)
            .and_then(|raw| raw.trim().parse::<f32>().ok())
            .map(clamp_rate)
            .unwrap_or(DEFAULT_RATE);
        Self { voice_id, rate }
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), StorageError> {
        match &self.voice_id {
            Some(id) => store.set(VOICE_KEY, id)?,
            None => store.remove(VOICE_KEY)?,
        }
        store.set(RATE_KEY, &clamp_rate(self.rate).to_string())
    }
}

/// Chooses the voice to use for the learning language: the saved one if it
/// is still offered, else a preferred default, else the first match.
pub fn pick_voice<'a>(voices: &'a [Voice], saved: Option<&str>, learning: &str) -> Option<&'a Voice> {
    let matching: Vec<&Voice> = voices.iter().filter(|v| v.matches_language(learning)).collect();
    if let Some(saved) = saved {
        if let Some(v) = matching.iter().find(|v| v.id == saved) {
            return Some(*v);
        }
    }
    let preferred_region = format!("{}-us", learning.to_ascii_lowercase());
    matching
        .iter()
        .find(|v| v.language.to_ascii_lowercase() == preferred_region)
        .or_else(|| matching.first())
        .copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub native: String,
    pub learning: String,
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self {
            native: DEFAULT_NATIVE_LANG.to_string(),
            learning: DEFAULT_LEARNING_LANG.to_string(),
        }
    }
}

impl LanguagePair {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: String| {
            store
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| is_supported_language(v))
                .unwrap_or(fallback)
        };
        let native = read(NATIVE_LANG_KEY, defaults.native);
        let learning = read(LEARNING_LANG_KEY, defaults.learning);
        if native == learning {
            return Self::default();
        }
        Self { native, learning }
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), StorageError> {
        store.set(NATIVE_LANG_KEY, &self.native)?;
        store.set(LEARNING_LANG_KEY, &self.learning)
    }

    /// Picking the language already used on the other side swaps the pair.
    pub fn set_native(&mut self, code: &str) {
        if code == self.learning {
            self.learning = std::mem::take(&mut self.native);
        }
        self.native = code.to_string();
    }

    pub fn set_learning(&mut self, code: &str) {
        if code == self.native {
            self.native = std::mem::take(&mut self.learning);
        }
        self.learning = code.to_string();
    }
}
