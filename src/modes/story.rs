use crate::backend::prompts::{story_prompt, STORY_MAX_OUTPUT_TOKENS, STORY_TEMPERATURE};
use crate::backend::{GenerateRequest, GenerativeBackend, STORY_APOLOGY};

/// A short story on a theme, in the learning language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRequest {
    pub theme: String,
    pub language: String,
}

impl StoryRequest {
    /// `None` for a blank theme.
    pub fn new(theme: &str, language: &str) -> Option<Self> {
        let theme = theme.trim();
        if theme.is_empty() {
            return None;
        }
        Some(Self {
            theme: theme.to_string(),
            language: language.to_string(),
        })
    }

    fn generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            max_output_tokens: Some(STORY_MAX_OUTPUT_TOKENS),
            ..GenerateRequest::text(story_prompt(&self.theme, &self.language), STORY_TEMPERATURE)
        }
    }

    /// The story text, or the apology when the backend fails.
    pub fn run(self, backend: &dyn GenerativeBackend) -> String {
        match backend.generate(&self.generate_request()) {
            Ok(story) => story.trim().to_string(),
            Err(e) => {
                tracing::warn!(theme = %self.theme, error = %e, "story generation failed");
                STORY_APOLOGY.to_string()
            }
        }
    }
}
