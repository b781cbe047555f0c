use crate::adventure::SubmitError;
use crate::backend::prompts::{dialogue_instruction, dialogue_opening, DIALOGUE_TEMPERATURE};
use crate::backend::{ChatConfig, ChatSession, GenerativeBackend, DIALOGUE_APOLOGY};
use crate::error::BackendError;

pub const SCENARIOS: [&str; 5] = [
    "Ordering coffee at a cafe",
    "Checking in at an airport",
    "Asking for directions",
    "A friendly chat about hobbies",
    "Making a restaurant reservation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Learner,
    Partner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueLine {
    pub speaker: Speaker,
    pub text: String,
}

pub struct DialogueRequest {
    epoch: u64,
    chat: Box<dyn ChatSession>,
    input: String,
}

pub struct DialogueReply {
    epoch: u64,
    chat: Box<dyn ChatSession>,
    result: Result<String, BackendError>,
}

impl DialogueRequest {
    pub fn run(mut self) -> DialogueReply {
        let result = self.chat.send(&self.input);
        DialogueReply {
            epoch: self.epoch,
            chat: self.chat,
            result,
        }
    }
}

/// A role-play conversation about one scenario. Lives only in memory.
#[derive(Default)]
pub struct DialogueSession {
    scenario: Option<String>,
    lines: Vec<DialogueLine>,
    chat: Option<Box<dyn ChatSession>>,
    in_flight: bool,
    epoch: u64,
    last_error: Option<String>,
}

impl DialogueSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn lines(&self) -> &[DialogueLine] {
        &self.lines
    }

    pub fn is_waiting(&self) -> bool {
        self.in_flight
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Starts a new conversation, dropping any previous one.
    pub fn choose(&mut self, scenario: &str, backend: &dyn GenerativeBackend, learning: &str) -> DialogueRequest {
        self.epoch += 1;
        self.scenario = Some(scenario.to_string());
        self.lines.clear();
        self.last_error = None;
        let chat = backend.start_chat(ChatConfig {
            system_instruction: dialogue_instruction(learning),
            temperature: DIALOGUE_TEMPERATURE,
            history: Vec::new(),
        });
        tracing::info!(scenario, "starting dialogue");
        self.issue(chat, dialogue_opening(scenario))
    }

    pub fn submit(&mut self, input: &str) -> Result<DialogueRequest, SubmitError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.in_flight {
            return Err(SubmitError::Busy);
        }
        let chat = self.chat.take().ok_or(SubmitError::NotStarted)?;
        self.lines.push(DialogueLine {
            speaker: Speaker::Learner,
            text: input.to_string(),
        });
        self.last_error = None;
        Ok(self.issue(chat, input.to_string()))
    }

    /// Returns `false` for a reply from an abandoned conversation.
    pub fn apply(&mut self, reply: DialogueReply) -> bool {
        if reply.epoch != self.epoch {
            return false;
        }
        self.in_flight = false;
        self.chat = Some(reply.chat);
        match reply.result {
            Ok(text) => self.lines.push(DialogueLine {
                speaker: Speaker::Partner,
                text: text.trim().to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "dialogue request failed");
                self.last_error = Some(DIALOGUE_APOLOGY.to_string());
            }
        }
        true
    }

    /// Back to the scenario list.
    pub fn reset(&mut self) {
        *self = Self {
            epoch: self.epoch + 1,
            ..Self::default()
        };
    }

    fn issue(&mut self, chat: Box<dyn ChatSession>, input: String) -> DialogueRequest {
        self.in_flight = true;
        DialogueRequest {
            epoch: self.epoch,
            chat,
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;

    #[test]
    fn conversation_alternates_speakers() {
        let backend = FakeBackend::with_replies(["Hi! What can I get you?", "One latte, coming up."]);
        let mut session = DialogueSession::new();
        let opening = session.choose(SCENARIOS[0], &backend, "en");
        assert!(session.apply(opening.run()));
        assert!(backend.prompts()[0].contains("\"Ordering coffee at a cafe\""));

        let request = session.submit("A latte, please").unwrap();
        assert!(session.apply(request.run()));
        let speakers: Vec<Speaker> = session.lines().iter().map(|l| l.speaker).collect();
        assert_eq!(speakers, vec![Speaker::Partner, Speaker::Learner, Speaker::Partner]);
    }

    #[test]
    fn submit_needs_a_conversation_and_text() {
        let mut session = DialogueSession::new();
        assert_eq!(session.submit("hello").err(), Some(SubmitError::NotStarted));
        assert_eq!(session.submit(" ").err(), Some(SubmitError::Empty));
    }

    #[test]
    fn failure_surfaces_the_apology() {
        let backend = FakeBackend::failing();
        let mut session = DialogueSession::new();
        let opening = session.choose(SCENARIOS[2], &backend, "de");
        session.apply(opening.run());
        assert_eq!(session.last_error(), Some(DIALOGUE_APOLOGY));
        assert!(session.lines().is_empty());
        assert!(!session.is_waiting());
    }

    #[test]
    fn replies_for_an_abandoned_scenario_are_dropped() {
        let backend = FakeBackend::with_replies(["Welcome aboard.", "Hello!"]);
        let mut session = DialogueSession::new();
        let stale = session.choose(SCENARIOS[1], &backend, "en");
        session.reset();
        assert!(!session.apply(stale.run()));
        assert!(session.scenario().is_none());
        assert!(session.lines().is_empty());
    }
}
