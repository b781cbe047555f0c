use super::{ChatConfig, ChatSession, GenerateRequest, GenerativeBackend};
use crate::config::Config;
use crate::error::BackendError;
use crate::types::session::{HistoryEntry, Role};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- Wire format of the generateContent endpoint ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        inline_data: None,
    }
}

fn history_content(entry: &HistoryEntry) -> Content {
    let role = match entry.role {
        Role::User => "user",
        Role::Narrator => "model",
    };
    Content {
        role: Some(role.to_string()),
        parts: vec![text_part(&entry.text)],
    }
}

fn chat_body(config: &ChatConfig, history: &[HistoryEntry], text: &str) -> GenerateContentBody {
    let mut contents: Vec<Content> = history.iter().map(history_content).collect();
    contents.push(Content {
        role: Some("user".to_string()),
        parts: vec![text_part(text)],
    });
    GenerateContentBody {
        contents,
        system_instruction: Some(Content {
            role: None,
            parts: vec![text_part(&config.system_instruction)],
        }),
        generation_config: GenerationConfig {
            temperature: config.temperature,
            max_output_tokens: None,
        },
    }
}

fn generate_body(request: &GenerateRequest) -> GenerateContentBody {
    let mut parts = vec![text_part(&request.prompt)];
    if let Some(image) = &request.image {
        parts.push(Part {
            text: None,
            inline_data: Some(Blob {
                mime_type: image.mime_type.clone(),
                data: BASE64.encode(&image.data),
            }),
        });
    }
    GenerateContentBody {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: None,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, BackendError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        Err(BackendError::EmptyResponse)
    } else {
        Ok(text)
    }
}

/// Blocking client for the Gemini REST API. Cheap to clone; every chat
/// session holds its own clone.
#[derive(Clone)]
pub struct GeminiBackend {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BackendError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(
            api_key,
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn post(&self, body: &GenerateContentBody) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", API_BASE, self.model);
        tracing::debug!(model = %self.model, contents = body.contents.len(), "sending generateContent request");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: GenerateContentResponse = response.json()?;
        extract_text(parsed)
    }
}

impl GenerativeBackend for GeminiBackend {
    fn start_chat(&self, config: ChatConfig) -> Box<dyn ChatSession> {
        let history = config.history.clone();
        Box::new(GeminiChat {
            backend: self.clone(),
            config,
            history,
        })
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
        self.post(&generate_body(request))
    }
}

struct GeminiChat {
    backend: GeminiBackend,
    config: ChatConfig,
    history: Vec<HistoryEntry>,
}

impl ChatSession for GeminiChat {
    fn send(&mut self, text: &str) -> Result<String, BackendError> {
        let body = chat_body(&self.config, &self.history, text);
        let reply = self.backend.post(&body)?;
        self.history.push(HistoryEntry {
            role: Role::User,
            text: text.to_string(),
        });
        self.history.push(HistoryEntry {
            role: Role::Narrator,
            text: reply.clone(),
        });
        Ok(reply)
    }
}
