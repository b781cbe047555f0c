use crate::backend::prompts::{image_story_prompt, STORY_MAX_OUTPUT_TOKENS, STORY_TEMPERATURE};
use crate::backend::{GenerateRequest, GenerativeBackend, InlineImage, IMAGE_STORY_APOLOGY};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

pub const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, Error)]
pub enum ImageRejected {
    #[error("Image is too large ({size} bytes). Please select a file under 4MB.")]
    TooLarge { size: usize },
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("Could not read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Mime type from the file extension, for the formats the backend accepts.
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStoryRequest {
    pub theme: String,
    pub image: InlineImage,
    pub language: String,
}

impl ImageStoryRequest {
    /// Checks size and type up front so a bad image never reaches the backend.
    pub fn new(theme: &str, data: Vec<u8>, mime_type: &str, language: &str) -> Result<Self, ImageRejected> {
        if data.len() > MAX_IMAGE_BYTES {
            return Err(ImageRejected::TooLarge { size: data.len() });
        }
        if !SUPPORTED_IMAGE_TYPES.contains(&mime_type) {
            return Err(ImageRejected::UnsupportedType(mime_type.to_string()));
        }
        Ok(Self {
            theme: theme.trim().to_string(),
            image: InlineImage {
                mime_type: mime_type.to_string(),
                data,
            },
            language: language.to_string(),
        })
    }

    pub fn from_file(theme: &str, path: &Path, language: &str) -> Result<Self, ImageRejected> {
        let mime_type = mime_type_for(path).ok_or_else(|| {
            ImageRejected::UnsupportedType(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            )
        })?;
        let size = std::fs::metadata(path)
            .map_err(|source| ImageRejected::Unreadable {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size > MAX_IMAGE_BYTES as u64 {
            return Err(ImageRejected::TooLarge { size: size as usize });
        }
        let data = std::fs::read(path).map_err(|source| ImageRejected::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(theme, data, mime_type, language)
    }

    pub fn run(self, backend: &dyn GenerativeBackend) -> String {
        let request = GenerateRequest {
            prompt: image_story_prompt(&self.theme, &self.language),
            image: Some(self.image),
            temperature: STORY_TEMPERATURE,
            max_output_tokens: Some(STORY_MAX_OUTPUT_TOKENS),
        };
        match backend.generate(&request) {
            Ok(story) => story.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "image story generation failed");
                IMAGE_STORY_APOLOGY.to_string()
            }
        }
    }
}
