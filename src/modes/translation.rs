use crate::backend::prompts::translation_prompt;
use crate::backend::{GenerateRequest, GenerativeBackend, TRANSLATION_FAILED};
use crate::error::BackendError;

pub const TRANSLATION_TEMPERATURE: f32 = 0.0;

/// Translates `text` from `from` into `to`, returning the bare translation.
pub fn try_translate(
    backend: &dyn GenerativeBackend,
    text: &str,
    from: &str,
    to: &str,
) -> Result<String, BackendError> {
    let request = GenerateRequest::text(translation_prompt(text, from, to), TRANSLATION_TEMPERATURE);
    let reply = backend.generate(&request)?;
    Ok(reply.trim().to_string())
}

/// Display form used by the popup: failures become a fixed marker.
pub fn translate(backend: &dyn GenerativeBackend, text: &str, from: &str, to: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    match try_translate(backend, text, from, to) {
        Ok(translation) => translation,
        Err(e) => {
            tracing::warn!(error = %e, "translation failed");
            TRANSLATION_FAILED.to_string()
        }
    }
}

/// A popup translation to run off the UI thread. `id` lets the popup drop
/// replies for a selection it no longer shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationJob {
    pub id: u64,
    pub text: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub id: u64,
    pub text: String,
}

impl TranslationJob {
    pub fn run(self, backend: &dyn GenerativeBackend) -> TranslationResult {
        TranslationResult {
            text: translate(backend, &self.text, &self.from, &self.to),
            id: self.id,
        }
    }
}
