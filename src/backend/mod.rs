//! The generative-text backend, consumed only through these traits.

pub mod gemini;
pub mod prompts;

use crate::error::BackendError;
use crate::types::session::HistoryEntry;

pub use gemini::GeminiBackend;

pub const ADVENTURE_APOLOGY: &str =
    "Sorry, the storyteller could not continue right now. Please try again.";
pub const DIALOGUE_APOLOGY: &str =
    "Sorry, I couldn't reply right now. Please try sending your message again.";
pub const STORY_APOLOGY: &str =
    "Sorry, I couldn't generate a story right now. Please try again later.";
pub const IMAGE_STORY_APOLOGY: &str =
    "Sorry, I had trouble creating a story from the image. Please try another one.";
pub const TRANSLATION_FAILED: &str = "Translation failed.";

/// Seed for a conversational session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub system_instruction: String,
    pub temperature: f32,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A single, session-less generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            temperature,
            max_output_tokens: None,
        }
    }
}

/// A conversation with the backend. The history only grows when a send
/// succeeds, so a failed send can be retried as if it never happened.
pub trait ChatSession: Send {
    fn send(&mut self, text: &str) -> Result<String, BackendError>;
}

pub trait GenerativeBackend: Send + Sync {
    fn start_chat(&self, config: ChatConfig) -> Box<dyn ChatSession>;

    fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies in order and records every request. Chats
    /// started from it share the same reply queue.
    #[derive(Default, Clone)]
    pub(crate) struct FakeBackend {
        inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    struct FakeState {
        replies: VecDeque<Result<String, String>>,
        always_fail: bool,
        prompts: Vec<String>,
        temperatures: Vec<f32>,
        chats: Vec<ChatConfig>,
        images: Vec<InlineImage>,
    }

    impl FakeBackend {
        pub(crate) fn with_replies<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
            let backend = Self::default();
            for reply in replies {
                backend.push_reply(reply);
            }
            backend
        }

        pub(crate) fn failing() -> Self {
            let backend = Self::default();
            backend.inner.lock().unwrap().always_fail = true;
            backend
        }

        pub(crate) fn push_reply(&self, reply: &str) {
            self.inner.lock().unwrap().replies.push_back(Ok(reply.to_string()));
        }

        pub(crate) fn push_failure(&self) {
            self.inner
                .lock()
                .unwrap()
                .replies
                .push_back(Err("scripted failure".to_string()));
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.inner.lock().unwrap().prompts.clone()
        }

        pub(crate) fn temperatures(&self) -> Vec<f32> {
            self.inner.lock().unwrap().temperatures.clone()
        }

        pub(crate) fn chats(&self) -> Vec<ChatConfig> {
            self.inner.lock().unwrap().chats.clone()
        }

        pub(crate) fn images(&self) -> Vec<InlineImage> {
            self.inner.lock().unwrap().images.clone()
        }

        fn answer(&self, prompt: &str) -> Result<String, BackendError> {
            let mut state = self.inner.lock().unwrap();
            state.prompts.push(prompt.to_string());
            if state.always_fail {
                return Err(BackendError::Unavailable("backend offline".to_string()));
            }
            match state.replies.pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(reason)) => Err(BackendError::Unavailable(reason)),
                None => Err(BackendError::EmptyResponse),
            }
        }
    }

    impl GenerativeBackend for FakeBackend {
        fn start_chat(&self, config: ChatConfig) -> Box<dyn ChatSession> {
            self.inner.lock().unwrap().chats.push(config);
            Box::new(FakeChat { backend: self.clone() })
        }

        fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
            {
                let mut state = self.inner.lock().unwrap();
                state.temperatures.push(request.temperature);
                if let Some(image) = &request.image {
                    state.images.push(image.clone());
                }
            }
            self.answer(&request.prompt)
        }
    }

    struct FakeChat {
        backend: FakeBackend,
    }

    impl ChatSession for FakeChat {
        fn send(&mut self, text: &str) -> Result<String, BackendError> {
            self.backend.answer(text)
        }
    }
}
