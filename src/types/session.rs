use serde::{Deserialize, Serialize};
use std::fmt;

pub type MessageId = u64;

pub const MIN_PLAYERS: usize = 1;
pub const MAX_PLAYERS: usize = 4;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Basic,
        Difficulty::Intermediate,
        Difficulty::Advanced,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Basic => "Basic",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who produced a message, with the fields only that side carries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "sender", rename_all = "lowercase")]
pub enum Sender {
    User {
        #[serde(default, rename = "playerIndex", skip_serializing_if = "Option::is_none")]
        player_index: Option<usize>,
    },
    Narrator {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correction: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    #[serde(flatten)]
    pub sender: Sender,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>, player_index: Option<usize>) -> Self {
        Self {
            id,
            text: text.into(),
            sender: Sender::User { player_index },
        }
    }

    pub fn narrator(id: MessageId, text: impl Into<String>, correction: Option<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender: Sender::Narrator { correction },
        }
    }

    pub fn is_narrator(&self) -> bool {
        matches!(self.sender, Sender::Narrator { .. })
    }

    pub fn correction(&self) -> Option<&str> {
        match &self.sender {
            Sender::Narrator { correction } => correction.as_deref(),
            Sender::User { .. } => None,
        }
    }

    pub fn player_index(&self) -> Option<usize> {
        match self.sender {
            Sender::User { player_index } => player_index,
            Sender::Narrator { .. } => None,
        }
    }
}

/// The persisted shape of an adventure in progress.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub theme: String,
    #[serde(rename = "messages")]
    pub transcript: Vec<Message>,
    pub difficulty: Difficulty,
    #[serde(rename = "numberOfPlayers")]
    pub player_count: usize,
    pub current_player_index: usize,
}

impl SessionState {
    /// A saved session is only worth offering when it has something to resume.
    pub fn is_resumable(&self) -> bool {
        !self.transcript.is_empty() && self.player_count >= MIN_PLAYERS
    }

    pub fn next_message_id(&self) -> MessageId {
        self.transcript.iter().map(|m| m.id).max().map_or(1, |id| id + 1)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Narrator,
}

/// One turn of backend conversation history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Rebuilds backend history from a transcript so that the backend sees
/// exactly what the learner was shown, corrections included.
pub fn history_from_transcript(transcript: &[Message]) -> Vec<HistoryEntry> {
    transcript
        .iter()
        .map(|msg| match &msg.sender {
            Sender::User { .. } => HistoryEntry {
                role: Role::User,
                text: msg.text.clone(),
            },
            Sender::Narrator { correction } => HistoryEntry {
                role: Role::Narrator,
                text: match correction {
                    Some(c) => format!("Correction: \"{}\"\n{}", c, msg.text),
                    None => msg.text.clone(),
                },
            },
        })
        .collect()
}
