//! The multi-player adventure: setup, round-robin turns, the transcript and
//! its persistence.
//!
//! Backend calls never happen inside the session. `start` and `submit` hand
//! out a [`TurnRequest`] that owns the chat handle; the caller runs it
//! wherever blocking is acceptable and feeds the [`TurnReply`] back through
//! [`AdventureSession::apply`]. Each request carries the session epoch, and
//! a reply from before a new game or a resume is dropped.

use crate::backend::prompts::{adventure_instruction, adventure_opening, ADVENTURE_TEMPERATURE};
use crate::backend::{ChatConfig, ChatSession, GenerativeBackend, ADVENTURE_APOLOGY};
use crate::error::BackendError;
use crate::parsing::response::parse_response;
use crate::storage::{load_json, save_json, KeyValueStore, SESSION_KEY};
use crate::types::session::{
    history_from_transcript, Difficulty, Message, MessageId, SessionState, MAX_PLAYERS, MIN_PLAYERS,
};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("choose a difficulty first")]
    MissingDifficulty,
    #[error("choose the number of players first")]
    MissingPlayerCount,
    #[error("player count must be between 1 and 4, got {0}")]
    InvalidPlayerCount(usize),
    #[error("enter a theme for the adventure")]
    EmptyTheme,
    #[error("the narrator is still answering")]
    Busy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("nothing to send")]
    Empty,
    #[error("the adventure has not started")]
    NotStarted,
    #[error("the narrator is still answering")]
    Busy,
}

/// Choices made on the setup screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdventureSetup {
    pub difficulty: Option<Difficulty>,
    pub player_count: Option<usize>,
    pub theme: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Opening,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    epoch: u64,
    kind: TurnKind,
}

/// One backend round trip, ready to run off the UI thread.
pub struct TurnRequest {
    ticket: Ticket,
    chat: Box<dyn ChatSession>,
    input: String,
}

pub struct TurnReply {
    ticket: Ticket,
    chat: Box<dyn ChatSession>,
    result: Result<String, BackendError>,
}

impl TurnRequest {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn run(mut self) -> TurnReply {
        let result = self.chat.send(&self.input);
        TurnReply {
            ticket: self.ticket,
            chat: self.chat,
            result,
        }
    }
}

impl TurnReply {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Reads a saved adventure. Anything unparsable or not worth resuming is
/// removed from the store and reported as absent.
pub fn load_saved_session(store: &mut dyn KeyValueStore) -> Option<SessionState> {
    let mut state: SessionState = load_json(store, SESSION_KEY)?;
    if !state.is_resumable() {
        tracing::info!("discarding saved adventure with nothing to resume");
        if let Err(e) = store.remove(SESSION_KEY) {
            tracing::warn!(error = %e, "failed to remove saved adventure");
        }
        return None;
    }
    state.current_player_index %= state.player_count;
    Some(state)
}

pub struct AdventureSession<S: KeyValueStore> {
    store: S,
    pub setup: AdventureSetup,
    started: bool,
    transcript: Vec<Message>,
    current_player_index: usize,
    chat: Option<Box<dyn ChatSession>>,
    in_flight: bool,
    epoch: u64,
    next_id: MessageId,
    played: HashSet<MessageId>,
    last_error: Option<String>,
}

impl<S: KeyValueStore> AdventureSession<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            setup: AdventureSetup::default(),
            started: false,
            transcript: Vec::new(),
            current_player_index: 0,
            chat: None,
            in_flight: false,
            epoch: 0,
            next_id: 1,
            played: HashSet::new(),
            last_error: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_waiting(&self) -> bool {
        self.in_flight
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn current_player_index(&self) -> usize {
        self.current_player_index
    }

    pub fn player_count(&self) -> usize {
        self.setup.player_count.unwrap_or(MIN_PLAYERS)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn load_saved(&mut self) -> Option<SessionState> {
        load_saved_session(&mut self.store)
    }

    /// The persisted form of the running adventure.
    pub fn snapshot(&self) -> Option<SessionState> {
        if !self.started {
            return None;
        }
        Some(SessionState {
            theme: self.setup.theme.clone(),
            transcript: self.transcript.clone(),
            difficulty: self.setup.difficulty?,
            player_count: self.setup.player_count?,
            current_player_index: self.current_player_index,
        })
    }

    /// Opens a fresh chat and asks for the opening scene.
    pub fn start(&mut self, backend: &dyn GenerativeBackend, learning: &str) -> Result<TurnRequest, SetupError> {
        if self.in_flight {
            return Err(SetupError::Busy);
        }
        let difficulty = self.setup.difficulty.ok_or(SetupError::MissingDifficulty)?;
        let player_count = self.setup.player_count.ok_or(SetupError::MissingPlayerCount)?;
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_count) {
            return Err(SetupError::InvalidPlayerCount(player_count));
        }
        let theme = self.setup.theme.trim().to_string();
        if theme.is_empty() {
            return Err(SetupError::EmptyTheme);
        }
        self.setup.theme = theme.clone();

        self.epoch += 1;
        self.started = true;
        self.transcript.clear();
        self.played.clear();
        self.current_player_index = 0;
        self.next_id = 1;
        self.last_error = None;

        let chat = backend.start_chat(ChatConfig {
            system_instruction: adventure_instruction(difficulty, player_count, learning),
            temperature: ADVENTURE_TEMPERATURE,
            history: Vec::new(),
        });
        tracing::info!(%difficulty, player_count, theme = %theme, "starting adventure");
        Ok(self.issue(chat, TurnKind::Opening, adventure_opening(&theme)))
    }

    /// Records the current player's action and hands out the request
    /// carrying it to the narrator.
    pub fn submit(&mut self, input: &str) -> Result<TurnRequest, SubmitError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SubmitError::Empty);
        }
        if !self.started {
            return Err(SubmitError::NotStarted);
        }
        if self.in_flight {
            return Err(SubmitError::Busy);
        }
        let chat = self.chat.take().ok_or(SubmitError::NotStarted)?;
        let id = self.allocate_id();
        self.transcript
            .push(Message::user(id, input, Some(self.current_player_index)));
        self.last_error = None;
        self.persist();
        Ok(self.issue(chat, TurnKind::Action, input.to_string()))
    }

    /// Applies a finished round trip. Returns `false` when the reply
    /// belonged to an earlier session and was dropped.
    pub fn apply(&mut self, reply: TurnReply) -> bool {
        if reply.ticket.epoch != self.epoch {
            tracing::info!(
                reply_epoch = reply.ticket.epoch,
                current = self.epoch,
                "discarding reply from a superseded adventure"
            );
            return false;
        }
        self.in_flight = false;
        self.chat = Some(reply.chat);
        match reply.result {
            Ok(raw) => {
                let parsed = parse_response(&raw);
                let id = self.allocate_id();
                self.transcript
                    .push(Message::narrator(id, parsed.story, parsed.correction));
                let player_count = self.player_count();
                if reply.ticket.kind == TurnKind::Action && player_count > 1 {
                    self.current_player_index = (self.current_player_index + 1) % player_count;
                }
                tracing::debug!(
                    messages = self.transcript.len(),
                    next_player = self.current_player_index,
                    "turn applied"
                );
                self.persist();
            }
            Err(e) => {
                tracing::warn!(error = %e, "narrator request failed");
                self.last_error = Some(ADVENTURE_APOLOGY.to_string());
                if reply.ticket.kind == TurnKind::Opening {
                    // No scene was set; go back to setup with the choices kept.
                    self.started = false;
                    self.chat = None;
                }
            }
        }
        true
    }

    /// Continues a saved adventure. Narration already in the transcript is
    /// treated as heard, so nothing starts speaking on its own.
    pub fn resume(&mut self, saved: SessionState, backend: &dyn GenerativeBackend, learning: &str) {
        let player_count = saved.player_count.clamp(MIN_PLAYERS, MAX_PLAYERS);
        let chat = backend.start_chat(ChatConfig {
            system_instruction: adventure_instruction(saved.difficulty, player_count, learning),
            temperature: ADVENTURE_TEMPERATURE,
            history: history_from_transcript(&saved.transcript),
        });
        self.epoch += 1;
        self.next_id = saved.next_message_id();
        self.played = saved
            .transcript
            .iter()
            .filter(|m| m.is_narrator())
            .map(|m| m.id)
            .collect();
        self.setup = AdventureSetup {
            difficulty: Some(saved.difficulty),
            player_count: Some(player_count),
            theme: saved.theme,
        };
        self.current_player_index = saved.current_player_index % player_count;
        self.transcript = saved.transcript;
        self.chat = Some(chat);
        self.in_flight = false;
        self.started = true;
        self.last_error = None;
        tracing::info!(messages = self.transcript.len(), "resumed adventure");
    }

    /// Forgets the adventure, including its saved copy.
    pub fn new_game(&mut self) {
        if let Err(e) = self.store.remove(SESSION_KEY) {
            tracing::warn!(error = %e, "failed to remove saved adventure");
        }
        self.epoch += 1;
        self.setup = AdventureSetup::default();
        self.started = false;
        self.transcript.clear();
        self.current_player_index = 0;
        self.chat = None;
        self.in_flight = false;
        self.next_id = 1;
        self.played.clear();
        self.last_error = None;
        tracing::info!("new game");
    }

    /// The newest narration if it has never been played, marking it played.
    pub fn take_autoplay(&mut self) -> Option<Message> {
        if self.in_flight {
            return None;
        }
        let last = self.transcript.last().filter(|m| m.is_narrator())?;
        if !self.played.insert(last.id) {
            return None;
        }
        Some(last.clone())
    }

    fn issue(&mut self, chat: Box<dyn ChatSession>, kind: TurnKind, input: String) -> TurnRequest {
        self.in_flight = true;
        TurnRequest {
            ticket: Ticket {
                epoch: self.epoch,
                kind,
            },
            chat,
            input,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn persist(&mut self) {
        let Some(state) = self.snapshot() else {
            return;
        };
        if state.transcript.is_empty() {
            return;
        }
        if let Err(e) = save_json(&mut self.store, SESSION_KEY, &state) {
            tracing::warn!(error = %e, "failed to save adventure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;
    use crate::storage::MemoryStore;
    use crate::types::session::Sender;

    fn session_with(players: usize) -> AdventureSession<MemoryStore> {
        let mut session = AdventureSession::new(MemoryStore::new());
        session.setup = AdventureSetup {
            difficulty: Some(Difficulty::Basic),
            player_count: Some(players),
            theme: "a haunted forest".to_string(),
        };
        session
    }

    fn started(players: usize, backend: &FakeBackend) -> AdventureSession<MemoryStore> {
        let mut session = session_with(players);
        let request = session.start(backend, "en").unwrap();
        assert!(session.apply(request.run()));
        session
    }

    fn turn(session: &mut AdventureSession<MemoryStore>, input: &str) {
        let request = session.submit(input).unwrap();
        assert!(session.apply(request.run()));
    }

    #[test]
    fn setup_requires_every_choice() {
        let backend = FakeBackend::default();
        let mut session = AdventureSession::new(MemoryStore::new());
        assert_eq!(session.start(&backend, "en").err(), Some(SetupError::MissingDifficulty));
        session.setup.difficulty = Some(Difficulty::Advanced);
        assert_eq!(session.start(&backend, "en").err(), Some(SetupError::MissingPlayerCount));
        session.setup.player_count = Some(5);
        assert_eq!(session.start(&backend, "en").err(), Some(SetupError::InvalidPlayerCount(5)));
        session.setup.player_count = Some(2);
        session.setup.theme = "   ".to_string();
        assert_eq!(session.start(&backend, "en").err(), Some(SetupError::EmptyTheme));
        assert!(backend.chats().is_empty());
    }

    #[test]
    fn opening_sends_the_theme_and_appends_narration() {
        let backend = FakeBackend::with_replies(["You stand at the forest edge. Player 1, what do you do?"]);
        let session = started(2, &backend);
        assert_eq!(
            backend.prompts(),
            vec!["Start the adventure with the theme: \"a haunted forest\".".to_string()]
        );
        assert!(backend.chats()[0].system_instruction.contains("group of 2 players"));
        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].is_narrator());
        assert_eq!(session.current_player_index(), 0);
    }

    #[test]
    fn turns_rotate_round_robin() {
        let backend = FakeBackend::with_replies(["Opening.", "One.", "Two.", "Three.", "Four."]);
        let mut session = started(3, &backend);
        for action in ["I look around", "I draw my sword", "I cast a spell", "I run"] {
            turn(&mut session, action);
        }
        assert_eq!(session.current_player_index(), 1);
        let players: Vec<Option<usize>> = session
            .transcript()
            .iter()
            .filter(|m| !m.is_narrator())
            .map(|m| m.player_index())
            .collect();
        assert_eq!(players, vec![Some(0), Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn single_player_never_rotates() {
        let backend = FakeBackend::with_replies(["Opening.", "One.", "Two."]);
        let mut session = started(1, &backend);
        turn(&mut session, "go north");
        turn(&mut session, "go south");
        assert_eq!(session.current_player_index(), 0);
    }

    #[test]
    fn corrections_are_split_from_the_story() {
        let backend = FakeBackend::with_replies([
            "Opening.",
            "Correction: \"I go to the cave.\"\nYou approach the cave. Player 2, what do you do?",
        ]);
        let mut session = started(2, &backend);
        turn(&mut session, "i go to the cave");
        let last = session.transcript().last().unwrap();
        assert_eq!(last.correction(), Some("I go to the cave."));
        assert_eq!(last.text, "You approach the cave. Player 2, what do you do?");
    }

    #[test]
    fn submit_is_rejected_when_empty_unstarted_or_busy() {
        let backend = FakeBackend::with_replies(["Opening."]);
        let mut idle = session_with(2);
        assert_eq!(idle.submit("hello").err(), Some(SubmitError::NotStarted));

        let mut session = started(2, &backend);
        assert_eq!(session.submit("   ").err(), Some(SubmitError::Empty));
        let pending = session.submit("first").unwrap();
        assert_eq!(session.submit("second").err(), Some(SubmitError::Busy));
        assert_eq!(pending.input(), "first");
    }

    #[test]
    fn failure_keeps_the_turn_and_allows_a_retry() {
        let backend = FakeBackend::with_replies(["Opening."]);
        let mut session = started(2, &backend);
        backend.push_failure();
        turn(&mut session, "I open the door");
        assert_eq!(session.last_error(), Some(ADVENTURE_APOLOGY));
        assert_eq!(session.current_player_index(), 0);
        assert_eq!(session.transcript().len(), 2);
        assert!(!session.transcript().last().unwrap().is_narrator());

        backend.push_reply("The door opens.");
        turn(&mut session, "I open the door again");
        assert_eq!(session.last_error(), None);
        assert_eq!(session.current_player_index(), 1);
    }

    #[test]
    fn failed_opening_returns_to_setup_with_choices_kept() {
        let backend = FakeBackend::failing();
        let mut session = session_with(3);
        let request = session.start(&backend, "en").unwrap();
        assert!(session.apply(request.run()));
        assert!(!session.is_started());
        assert!(!session.is_waiting());
        assert_eq!(session.last_error(), Some(ADVENTURE_APOLOGY));
        assert_eq!(session.submit("I look around").err(), Some(SubmitError::NotStarted));
        assert_eq!(session.setup.player_count, Some(3));
        assert_eq!(session.setup.theme, "a haunted forest");

        let backend = FakeBackend::with_replies(["The forest is quiet."]);
        let request = session.start(&backend, "en").unwrap();
        assert!(session.apply(request.run()));
        assert!(session.is_started());
        assert_eq!(session.last_error(), None);
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn reply_after_new_game_is_discarded() {
        let backend = FakeBackend::with_replies(["Opening.", "Too late."]);
        let mut session = started(2, &backend);
        let request = session.submit("wait").unwrap();
        session.new_game();
        assert!(!session.apply(request.run()));
        assert!(session.transcript().is_empty());
        assert!(!session.is_started());
        assert!(!session.is_waiting());
        assert_eq!(session.load_saved(), None);
    }

    #[test]
    fn every_mutation_is_persisted() {
        let store = MemoryStore::new();
        let backend = FakeBackend::with_replies(["Opening."]);
        let mut session = session_with(2);
        session.store = store.clone();
        let request = session.start(&backend, "en").unwrap();
        assert_eq!(store.get(SESSION_KEY), None);
        session.apply(request.run());

        let _pending = session.submit("I listen").unwrap();
        let saved = load_saved_session(&mut store.clone()).unwrap();
        assert_eq!(saved.transcript.len(), 2);
        assert_eq!(saved.player_count, 2);
        assert_eq!(saved.theme, "a haunted forest");
    }

    #[test]
    fn resume_rebuilds_history_verbatim_without_autoplay() {
        let backend = FakeBackend::with_replies([
            "Opening.",
            "Correction: \"I go to the cave.\"\nYou approach the cave.",
        ]);
        let mut first = started(2, &backend);
        assert!(first.take_autoplay().is_some());
        turn(&mut first, "i go to the cave");
        let saved = first.snapshot().unwrap();

        let mut resumed = AdventureSession::new(MemoryStore::new());
        resumed.resume(saved.clone(), &backend, "en");
        let history = &backend.chats()[1].history;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].text, "i go to the cave");
        assert_eq!(history[2].text, "Correction: \"I go to the cave.\"\nYou approach the cave.");
        assert_eq!(resumed.current_player_index(), 1);
        assert_eq!(resumed.transcript(), saved.transcript.as_slice());
        assert_eq!(resumed.take_autoplay(), None);

        backend.push_reply("A bat flies out.");
        turn(&mut resumed, "I wait");
        let ids: Vec<MessageId> = resumed.transcript().iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(resumed.take_autoplay().is_some());
    }

    #[test]
    fn autoplay_fires_once_per_narration() {
        let backend = FakeBackend::with_replies(["Opening.", "Next."]);
        let mut session = started(1, &backend);
        let first = session.take_autoplay().unwrap();
        assert!(matches!(first.sender, Sender::Narrator { .. }));
        assert_eq!(session.take_autoplay(), None);

        let request = session.submit("go").unwrap();
        assert_eq!(session.take_autoplay(), None);
        session.apply(request.run());
        assert_eq!(session.take_autoplay().unwrap().text, "Next.");
    }

    #[test]
    fn background_turn_drives_narration() {
        use crate::playback::tests::controller;
        use crate::playback::PlaybackStatus;
        use crate::worker::Worker;
        use std::time::{Duration, Instant};

        let backend = FakeBackend::with_replies(["A door creaks. Someone whispers."]);
        let mut session = session_with(1);
        let worker = Worker::new();
        let request = session.start(&backend, "en").unwrap();
        worker.spawn(move || request.run()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut replies = Vec::new();
        while replies.is_empty() && Instant::now() < deadline {
            replies = worker.drain();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(replies.len(), 1);
        for reply in replies {
            assert!(session.apply(reply));
        }

        let mut narration = controller();
        let msg = session.take_autoplay().unwrap();
        narration.play_from_sentence(&msg, 0);
        narration.engine_mut().finish_current();
        narration.pump();
        assert_eq!(narration.state().active_sentence, Some(1));

        // Sending the next action silences the narrator before the reply.
        let stale = narration.generation();
        session.submit("I open the door").unwrap();
        narration.stop();
        narration.engine_mut().finish_current();
        narration.pump();
        assert_eq!(narration.status(), PlaybackStatus::Idle);
        assert!(narration.generation() > stale);
    }

    #[test]
    fn saved_state_is_validated_on_load() {
        let mut store = MemoryStore::new();
        store.set(SESSION_KEY, "{\"theme\":\"x\"}").unwrap();
        assert_eq!(load_saved_session(&mut store), None);
        assert_eq!(store.get(SESSION_KEY), None);

        let empty = SessionState {
            theme: "x".into(),
            transcript: Vec::new(),
            difficulty: Difficulty::Basic,
            player_count: 2,
            current_player_index: 0,
        };
        save_json(&mut store, SESSION_KEY, &empty).unwrap();
        assert_eq!(load_saved_session(&mut store), None);
        assert_eq!(store.get(SESSION_KEY), None);

        let out_of_range = SessionState {
            transcript: vec![Message::narrator(1, "Hi.", None)],
            current_player_index: 5,
            ..empty
        };
        save_json(&mut store, SESSION_KEY, &out_of_range).unwrap();
        assert_eq!(load_saved_session(&mut store).unwrap().current_player_index, 1);
    }
}
