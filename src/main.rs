#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use clap::Parser;
use eframe::{egui, App, NativeOptions};
use egui::text::{LayoutJob, TextFormat};
use egui::{Color32, Pos2, Rect, RichText};
use std::sync::Arc;
use std::time::Duration;

use lingo_rpg::adventure::{AdventureSession, SubmitError, TurnReply};
use lingo_rpg::backend::{GeminiBackend, GenerativeBackend, TRANSLATION_FAILED};
use lingo_rpg::config::{load_config_from_file, CliArgs, Config};
use lingo_rpg::logging::init_tracing;
use lingo_rpg::modes::dialogue::{DialogueReply, DialogueSession, Speaker, SCENARIOS};
use lingo_rpg::modes::image_story::ImageStoryRequest;
use lingo_rpg::modes::story::StoryRequest;
use lingo_rpg::modes::translation::{TranslationJob, TranslationResult};
use lingo_rpg::parsing::segmenter::word_at;
use lingo_rpg::playback::{Highlight, NarrationController, PlaybackStatus};
use lingo_rpg::selection::{SelectionCoordinator, SelectionGesture};
use lingo_rpg::settings::{
    language_name, pick_voice, LanguagePair, SpeechSettings, MAX_RATE, MIN_RATE, SUPPORTED_LANGUAGES,
};
use lingo_rpg::speech::{voices_for_language, CommandSpeech, SpeechEngine, Voice};
use lingo_rpg::storage::DirectoryStore;
use lingo_rpg::types::session::{Difficulty, Message, MessageId, SessionState, Sender, MAX_PLAYERS, MIN_PLAYERS};
use lingo_rpg::vocab::{Flashcards, LookupReply, LookupRequest, VocabularyDeck};
use lingo_rpg::worker::Worker;

/// Results coming back from worker threads.
enum Job {
    Turn(TurnReply),
    Dialogue(DialogueReply),
    Story(String),
    ImageStory(String),
    Lookup(LookupReply),
    Translation(TranslationResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Adventure,
    Dialogue,
    Story,
    ImageStory,
    Vocabulary,
    About,
}

impl Tab {
    const ALL: [Tab; 6] = [
        Tab::Adventure,
        Tab::Dialogue,
        Tab::Story,
        Tab::ImageStory,
        Tab::Vocabulary,
        Tab::About,
    ];

    fn label(self) -> &'static str {
        match self {
            Tab::Adventure => "RPG",
            Tab::Dialogue => "Dialogue",
            Tab::Story => "Story",
            Tab::ImageStory => "Image Story",
            Tab::Vocabulary => "Vocabulary",
            Tab::About => "About",
        }
    }
}

/// What the pointer did over a block of selectable text. Offsets are bytes.
enum TextGesture {
    Click(usize),
    DoubleClick { word: String, rect: Rect },
    Selection { text: String, rect: Rect },
}

enum NarrationAction {
    Toggle(MessageId),
    Previous,
    Next,
    Gesture(MessageId, TextGesture),
}

fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices().nth(char_index).map_or(text.len(), |(b, _)| b)
}

fn highlight_job(ui: &egui::Ui, text: &str, highlight: Option<&Highlight>, wrap_width: f32) -> LayoutJob {
    let plain = TextFormat {
        font_id: egui::TextStyle::Body.resolve(ui.style()),
        color: ui.visuals().text_color(),
        ..Default::default()
    };
    let mut job = LayoutJob::default();
    job.wrap.max_width = wrap_width;
    let valid = highlight.filter(|h| {
        h.range.start <= h.range.end
            && h.range.end <= text.len()
            && text.is_char_boundary(h.range.start)
            && text.is_char_boundary(h.range.end)
    });
    match valid {
        Some(h) => {
            let underline = if h.cursor.is_some() {
                egui::Stroke::new(1.5, Color32::from_rgb(250, 204, 21))
            } else {
                egui::Stroke::NONE
            };
            let marked = TextFormat {
                background: Color32::from_rgb(66, 56, 20),
                underline,
                ..plain.clone()
            };
            job.append(&text[..h.range.start], 0.0, plain.clone());
            job.append(&text[h.range.clone()], 0.0, marked);
            job.append(&text[h.range.end..], 0.0, plain);
        }
        None => job.append(text, 0.0, plain),
    }
    job
}

/// Read-only text that can be clicked, double-clicked and selected.
fn selectable_text(
    ui: &mut egui::Ui,
    id: impl std::hash::Hash,
    text: &str,
    highlight: Option<&Highlight>,
) -> Option<TextGesture> {
    let mut layouter = |ui: &egui::Ui, s: &str, wrap_width: f32| {
        let job = highlight_job(ui, s, highlight, wrap_width);
        ui.fonts(|f| f.layout_job(job))
    };
    let mut buffer = text;
    let output = egui::TextEdit::multiline(&mut buffer)
        .id_source(id)
        .frame(false)
        .desired_rows(1)
        .desired_width(f32::INFINITY)
        .layouter(&mut layouter)
        .show(ui);

    let range = output.cursor_range?;
    let [start, end] = range.sorted_cursors();
    let start_byte = char_to_byte(text, start.ccursor.index);
    let end_byte = char_to_byte(text, end.ccursor.index);
    let rect = output
        .galley
        .pos_from_cursor(&start)
        .union(output.galley.pos_from_cursor(&end))
        .translate(output.galley_pos.to_vec2());
    let response = &output.response;

    if response.double_clicked() {
        let word = word_at(text, start_byte)?;
        return Some(TextGesture::DoubleClick {
            word: word.to_string(),
            rect,
        });
    }
    if start_byte == end_byte {
        return response.clicked().then_some(TextGesture::Click(start_byte));
    }
    if response.hovered() && ui.input(|i| i.pointer.primary_released()) {
        return Some(TextGesture::Selection {
            text: text[start_byte..end_byte].to_string(),
            rect,
        });
    }
    None
}

struct LingoApp {
    config_error: Option<String>,
    backend: Option<Arc<dyn GenerativeBackend>>,
    backend_error: Option<String>,
    worker: Worker<Job>,
    settings_store: DirectoryStore,
    tab: Tab,
    show_settings: bool,

    languages: LanguagePair,
    speech_settings: SpeechSettings,
    voices: Vec<Voice>,
    narration: NarrationController<CommandSpeech>,

    selection: SelectionCoordinator,
    popup_origin: Pos2,
    popup_source: Option<String>,
    translation_text: Option<String>,
    translation_seq: u64,

    adventure: AdventureSession<DirectoryStore>,
    saved_session: Option<SessionState>,
    setup_error: Option<String>,
    adventure_input: String,

    dialogue: DialogueSession,
    dialogue_input: String,

    story_theme: String,
    story: Option<String>,
    story_loading: bool,

    image_path: String,
    image_theme: String,
    image_story: Option<String>,
    image_error: Option<String>,
    image_loading: bool,

    deck: VocabularyDeck<DirectoryStore>,
    flashcards: Flashcards,
}

impl LingoApp {
    fn new(cc: &eframe::CreationContext<'_>, config: Config, config_error: Option<String>) -> Self {
        let store = DirectoryStore::new(config.data_dir.clone());
        let repaint_ctx = cc.egui_ctx.clone();
        let worker = Worker::new().with_notifier(move || repaint_ctx.request_repaint());

        let (backend, backend_error) = match GeminiBackend::from_config(&config) {
            Ok(backend) => (Some(Arc::new(backend) as Arc<dyn GenerativeBackend>), None),
            Err(e) => {
                tracing::warn!(error = %e, "backend unavailable");
                (None, Some(e.to_string()))
            }
        };

        let languages = LanguagePair::load(&store);
        let mut speech_settings = SpeechSettings::load(&store);
        let mut engine = CommandSpeech::new(config.speech_program.clone());
        let voices = engine.voices();
        speech_settings.voice_id = pick_voice(&voices, speech_settings.voice_id.as_deref(), &languages.learning)
            .map(|v| v.id.clone());
        let narration = NarrationController::new(engine, speech_settings.clone(), languages.learning.clone());

        let mut adventure = AdventureSession::new(store.clone());
        let saved_session = adventure.load_saved();
        let deck = VocabularyDeck::load(store.clone());
        tracing::info!(
            data_dir = %config.data_dir.display(),
            voices = voices.len(),
            saved_game = saved_session.is_some(),
            "LingoRPG ready"
        );

        Self {
            config_error,
            backend,
            backend_error,
            worker,
            settings_store: store,
            tab: Tab::Adventure,
            show_settings: false,
            languages,
            speech_settings,
            voices,
            narration,
            selection: SelectionCoordinator::new(),
            popup_origin: Pos2::ZERO,
            popup_source: None,
            translation_text: None,
            translation_seq: 0,
            adventure,
            saved_session,
            setup_error: None,
            adventure_input: String::new(),
            dialogue: DialogueSession::new(),
            dialogue_input: String::new(),
            story_theme: String::new(),
            story: None,
            story_loading: false,
            image_path: String::new(),
            image_theme: String::new(),
            image_story: None,
            image_error: None,
            image_loading: false,
            deck,
            flashcards: Flashcards::default(),
        }
    }

    fn spawn_job(&self, job: impl FnOnce() -> Job + Send + 'static) {
        if let Err(e) = self.worker.spawn(job) {
            tracing::error!(error = %e, "could not start background job");
        }
    }

    fn dispatch_lookup(&self, lookup: LookupRequest) {
        if let Some(backend) = self.backend.clone() {
            self.spawn_job(move || Job::Lookup(lookup.run(backend.as_ref())));
        }
    }

    fn apply_jobs(&mut self) {
        for job in self.worker.drain() {
            match job {
                Job::Turn(reply) => {
                    self.adventure.apply(reply);
                }
                Job::Dialogue(reply) => {
                    self.dialogue.apply(reply);
                }
                Job::Story(text) => {
                    self.story = Some(text);
                    self.story_loading = false;
                }
                Job::ImageStory(text) => {
                    self.image_story = Some(text);
                    self.image_loading = false;
                }
                Job::Lookup(reply) => {
                    self.deck.finish_add(reply);
                }
                Job::Translation(result) => {
                    if result.id == self.translation_seq && self.popup_source.is_some() {
                        self.translation_text = Some(result.text);
                    }
                }
            }
        }
    }

    // --- Translation popup ---

    fn request_popup_translation(&mut self, origin: Pos2) {
        let Some(info) = self.selection.popup() else {
            return;
        };
        self.popup_origin = origin;
        if self.popup_source.as_deref() == Some(info.text.as_str()) {
            return;
        }
        let text = info.text.clone();
        self.popup_source = Some(text.clone());
        self.translation_seq += 1;
        let Some(backend) = self.backend.clone() else {
            self.translation_text = Some(TRANSLATION_FAILED.to_string());
            return;
        };
        self.translation_text = None;
        let job = TranslationJob {
            id: self.translation_seq,
            text,
            from: self.languages.learning.clone(),
            to: self.languages.native.clone(),
        };
        self.spawn_job(move || Job::Translation(job.run(backend.as_ref())));
    }

    fn close_popup(&mut self) {
        self.selection.close_popup(&mut self.narration);
        self.popup_source = None;
        self.translation_text = None;
    }

    fn show_translation_popup(&mut self, ctx: &egui::Context) {
        let Some(info) = self.selection.popup().cloned() else {
            return;
        };
        let mut open = true;
        egui::Window::new("Translation")
            .collapsible(false)
            .resizable(false)
            .fixed_pos(self.popup_origin + info.anchor.to_vec2())
            .open(&mut open)
            .show(ctx, |ui| {
                ui.set_max_width(320.0);
                ui.label(RichText::new(&info.text).italics());
                ui.separator();
                match &self.translation_text {
                    Some(text) => {
                        ui.label(RichText::new(text).strong());
                    }
                    None => {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.label("Translating...");
                        });
                    }
                }
            });
        if !open || ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.close_popup();
        }
    }

    /// Selection over dialogue or story text.
    fn handle_passive_gesture(&mut self, gesture: TextGesture, container: Rect) {
        let (text, rect) = match gesture {
            TextGesture::Click(_) => return,
            TextGesture::DoubleClick { word, rect } => (word, rect),
            TextGesture::Selection { text, rect } => (text, rect),
        };
        let gesture = SelectionGesture::new(text, rect, container);
        if let Some(lookup) = self.selection.on_passive_selection(&gesture, &mut self.deck, &self.languages) {
            self.dispatch_lookup(lookup);
        } else if self.selection.is_open() {
            self.request_popup_translation(container.left_top());
        }
    }

    // --- Settings ---

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings;
        let mut native = self.languages.native.clone();
        let mut learning = self.languages.learning.clone();
        let mut voice_id = self.speech_settings.voice_id.clone();
        let mut rate = self.speech_settings.rate;
        let matching: Vec<Voice> = voices_for_language(&self.voices, &self.languages.learning)
            .into_iter()
            .cloned()
            .collect();

        egui::Window::new("Settings")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.heading("Language Settings");
                egui::Grid::new("language_grid").num_columns(2).show(ui, |ui| {
                    ui.label("I speak (Native Language)");
                    egui::ComboBox::from_id_source("native_lang")
                        .selected_text(language_name(&native).to_string())
                        .show_ui(ui, |ui| {
                            for (code, name) in SUPPORTED_LANGUAGES {
                                ui.selectable_value(&mut native, code.to_string(), name);
                            }
                        });
                    ui.end_row();
                    ui.label("I want to learn");
                    egui::ComboBox::from_id_source("learning_lang")
                        .selected_text(language_name(&learning).to_string())
                        .show_ui(ui, |ui| {
                            for (code, name) in SUPPORTED_LANGUAGES {
                                ui.selectable_value(&mut learning, code.to_string(), name);
                            }
                        });
                    ui.end_row();
                });

                ui.separator();
                ui.heading("Speech Settings");
                if matching.is_empty() {
                    ui.colored_label(Color32::GRAY, "No voices found for this language.");
                } else {
                    let current = matching
                        .iter()
                        .find(|v| Some(&v.id) == voice_id.as_ref())
                        .map_or("Default", |v| v.name.as_str())
                        .to_string();
                    egui::ComboBox::from_label("Voice")
                        .selected_text(current)
                        .show_ui(ui, |ui| {
                            for voice in &matching {
                                ui.selectable_value(&mut voice_id, Some(voice.id.clone()), voice.name.as_str());
                            }
                        });
                }
                ui.add(egui::Slider::new(&mut rate, MIN_RATE..=MAX_RATE).step_by(0.1).text("Speech Rate"));
            });
        self.show_settings = open;

        let mut speech_changed = false;
        if native != self.languages.native || learning != self.languages.learning {
            if native != self.languages.native {
                self.languages.set_native(&native);
            } else {
                self.languages.set_learning(&learning);
            }
            if let Err(e) = self.languages.save(&mut self.settings_store) {
                tracing::warn!(error = %e, "failed to save languages");
            }
            voice_id = pick_voice(&self.voices, voice_id.as_deref(), &self.languages.learning).map(|v| v.id.clone());
            speech_changed = true;
        }
        if voice_id != self.speech_settings.voice_id || rate != self.speech_settings.rate {
            self.speech_settings.voice_id = voice_id;
            self.speech_settings.rate = rate;
            speech_changed = true;
        }
        if speech_changed {
            if let Err(e) = self.speech_settings.save(&mut self.settings_store) {
                tracing::warn!(error = %e, "failed to save speech settings");
            }
            self.narration
                .set_voice_settings(self.speech_settings.clone(), self.languages.learning.clone());
        }
    }

    // --- Adventure ---

    fn start_adventure(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        self.close_popup();
        match self.adventure.start(backend.as_ref(), &self.languages.learning) {
            Ok(request) => {
                self.narration.stop();
                self.setup_error = None;
                self.saved_session = None;
                self.spawn_job(move || Job::Turn(request.run()));
            }
            Err(e) => self.setup_error = Some(e.to_string()),
        }
    }

    fn submit_adventure_action(&mut self) {
        match self.adventure.submit(&self.adventure_input) {
            Ok(request) => {
                self.narration.stop();
                self.close_popup();
                self.adventure_input.clear();
                self.spawn_job(move || Job::Turn(request.run()));
            }
            Err(SubmitError::Empty) => {}
            Err(e) => tracing::debug!(error = %e, "action not sent"),
        }
    }

    fn new_game(&mut self) {
        self.narration.stop();
        self.close_popup();
        self.adventure.new_game();
        self.saved_session = None;
        self.adventure_input.clear();
        self.setup_error = None;
    }

    fn show_continue_prompt(&mut self, ui: &mut egui::Ui, saved: &SessionState) {
        let mut resume = false;
        let mut discard = false;
        ui.vertical_centered(|ui| {
            ui.add_space(40.0);
            ui.heading("Welcome Back!");
            let players = if saved.player_count == 1 { "player" } else { "players" };
            ui.label(format!(
                "You have a saved adventure for {} {} ({}). Would you like to continue?",
                saved.player_count, players, saved.theme
            ));
            ui.add_space(12.0);
            ui.horizontal(|ui| {
                resume = ui
                    .add_enabled(self.backend.is_some(), egui::Button::new("Continue Adventure"))
                    .clicked();
                discard = ui.button("Start New Game").clicked();
            });
        });
        if resume {
            if let (Some(backend), Some(saved)) = (self.backend.clone(), self.saved_session.take()) {
                self.narration.stop();
                self.adventure.resume(saved, backend.as_ref(), &self.languages.learning);
            }
        } else if discard {
            self.new_game();
        }
    }

    fn show_adventure_setup(&mut self, ui: &mut egui::Ui) {
        let mut start = false;
        ui.heading("RPG Adventure Mode");
        ui.add_space(8.0);
        ui.label("First, choose your skill level for the language you're learning.");
        ui.horizontal(|ui| {
            for difficulty in Difficulty::ALL {
                ui.selectable_value(&mut self.adventure.setup.difficulty, Some(difficulty), difficulty.label());
            }
        });
        ui.add_space(8.0);
        ui.label("Next, select the number of players.");
        ui.horizontal(|ui| {
            for count in MIN_PLAYERS..=MAX_PLAYERS {
                let label = if count == 1 { "1 Player".to_string() } else { format!("{} Players", count) };
                ui.selectable_value(&mut self.adventure.setup.player_count, Some(count), label);
            }
        });
        ui.add_space(8.0);
        ui.label("Finally, enter a theme to begin your adventure.");
        ui.horizontal(|ui| {
            let edit = ui.add(
                egui::TextEdit::singleline(&mut self.adventure.setup.theme)
                    .hint_text("e.g., a haunted forest")
                    .desired_width(320.0),
            );
            let ready = self.backend.is_some()
                && self.adventure.setup.difficulty.is_some()
                && self.adventure.setup.player_count.is_some()
                && !self.adventure.setup.theme.trim().is_empty();
            let enter = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let clicked = ui.add_enabled(ready, egui::Button::new("Start Adventure")).clicked();
            start = clicked || (enter && ready);
        });
        if let Some(err) = &self.setup_error {
            ui.colored_label(Color32::RED, err.as_str());
        }
        if let Some(err) = self.adventure.last_error() {
            ui.colored_label(Color32::RED, err);
        }
        if start {
            self.start_adventure();
        }
    }

    fn show_adventure(&mut self, ui: &mut egui::Ui) {
        if !self.adventure.is_started() {
            match self.saved_session.clone() {
                Some(saved) => self.show_continue_prompt(ui, &saved),
                None => self.show_adventure_setup(ui),
            }
            return;
        }

        let mut new_game = false;
        ui.horizontal(|ui| {
            ui.heading(format!("Adventure: {}", self.adventure.setup.theme));
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                new_game = ui.button("New Game").clicked();
            });
        });
        if new_game {
            self.new_game();
            return;
        }
        ui.separator();

        let mut actions = Vec::new();
        let mut container = Rect::NOTHING;
        let waiting = self.adventure.is_waiting();
        let state = self.narration.state().clone();
        let can_previous = self.narration.can_skip_previous();
        let can_next = self.narration.can_skip_next();
        egui::ScrollArea::vertical()
            .id_source("adventure_scroll")
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .max_height((ui.available_height() - 48.0).max(120.0))
            .show(ui, |ui| {
                container = ui.clip_rect();
                for msg in self.adventure.transcript() {
                    match &msg.sender {
                        Sender::User { player_index } => {
                            ui.with_layout(egui::Layout::top_down(egui::Align::Max), |ui| {
                                let who = player_index.map_or("You".to_string(), |i| format!("Player {}", i + 1));
                                ui.label(RichText::new(who).small().color(Color32::GRAY));
                                ui.label(RichText::new(&msg.text).color(Color32::from_rgb(165, 180, 252)));
                            });
                        }
                        Sender::Narrator { correction } => {
                            if let Some(correction) = correction {
                                ui.label(
                                    RichText::new(format!("Correction: {}", correction))
                                        .italics()
                                        .color(Color32::from_rgb(134, 239, 172)),
                                );
                            }
                            let active = state.active_message == Some(msg.id);
                            ui.horizontal(|ui| {
                                if ui.add_enabled(active && can_previous, egui::Button::new("⏮")).clicked() {
                                    actions.push(NarrationAction::Previous);
                                }
                                let playing = active && state.status == PlaybackStatus::Playing;
                                if ui.button(if playing { "⏸ Pause" } else { "▶ Play" }).clicked() {
                                    actions.push(NarrationAction::Toggle(msg.id));
                                }
                                if ui.add_enabled(active && can_next, egui::Button::new("⏭")).clicked() {
                                    actions.push(NarrationAction::Next);
                                }
                            });
                            let highlight = self.narration.highlight(msg.id);
                            if let Some(gesture) = selectable_text(ui, ("narration", msg.id), &msg.text, highlight.as_ref())
                            {
                                actions.push(NarrationAction::Gesture(msg.id, gesture));
                            }
                        }
                    }
                    ui.add_space(10.0);
                }
                if waiting {
                    ui.spinner();
                }
            });

        if let Some(err) = self.adventure.last_error() {
            ui.colored_label(Color32::RED, err);
        }

        for action in actions {
            self.apply_narration_action(action, container);
        }

        let players = self.adventure.player_count();
        let hint = if players > 1 {
            format!("Player {}, what do you do?", self.adventure.current_player_index() + 1)
        } else {
            "What do you do?".to_string()
        };
        let mut submit = false;
        ui.horizontal(|ui| {
            let edit = ui.add_sized(
                [(ui.available_width() - 70.0).max(100.0), 28.0],
                egui::TextEdit::singleline(&mut self.adventure_input).hint_text(hint),
            );
            let enter = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let send = ui.add_enabled(!waiting, egui::Button::new("Send")).clicked();
            submit = enter || send;
        });
        if submit {
            self.submit_adventure_action();
        }
    }

    fn narrator_message(&self, id: MessageId) -> Option<Message> {
        self.adventure
            .transcript()
            .iter()
            .find(|m| m.id == id && m.is_narrator())
            .cloned()
    }

    fn apply_narration_action(&mut self, action: NarrationAction, container: Rect) {
        match action {
            NarrationAction::Toggle(id) => {
                if let Some(msg) = self.narrator_message(id) {
                    self.narration.toggle(&msg);
                }
            }
            NarrationAction::Previous => self.narration.skip_previous(),
            NarrationAction::Next => self.narration.skip_next(),
            NarrationAction::Gesture(id, TextGesture::Click(pos)) => {
                if let Some(msg) = self.narrator_message(id) {
                    self.narration.play_at(&msg, pos);
                }
            }
            NarrationAction::Gesture(_, TextGesture::DoubleClick { word, rect }) => {
                let gesture = SelectionGesture::new(word, rect, container);
                let lookup =
                    self.selection
                        .on_double_click(&gesture, &mut self.narration, &mut self.deck, &self.languages);
                if let Some(lookup) = lookup {
                    self.dispatch_lookup(lookup);
                }
                self.request_popup_translation(container.left_top());
            }
            NarrationAction::Gesture(_, TextGesture::Selection { text, rect }) => {
                let gesture = SelectionGesture::new(text, rect, container);
                if self.selection.on_selection(&gesture, &mut self.narration) {
                    self.request_popup_translation(container.left_top());
                }
            }
        }
    }

    // --- Dialogue ---

    fn show_dialogue(&mut self, ui: &mut egui::Ui) {
        let Some(scenario) = self.dialogue.scenario().map(str::to_string) else {
            ui.heading("Choose a Scenario");
            ui.add_space(8.0);
            let mut chosen = None;
            for scenario in SCENARIOS {
                if ui.add_enabled(self.backend.is_some(), egui::Button::new(scenario)).clicked() {
                    chosen = Some(scenario);
                }
            }
            if let (Some(scenario), Some(backend)) = (chosen, self.backend.clone()) {
                self.close_popup();
                let request = self.dialogue.choose(scenario, backend.as_ref(), &self.languages.learning);
                self.spawn_job(move || Job::Dialogue(request.run()));
            }
            return;
        };

        let mut change = false;
        ui.horizontal(|ui| {
            ui.heading(scenario.as_str());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                change = ui.button("Change Scenario").clicked();
            });
        });
        if change {
            self.close_popup();
            self.dialogue.reset();
            return;
        }
        ui.separator();

        let mut gestures = Vec::new();
        let mut container = Rect::NOTHING;
        egui::ScrollArea::vertical()
            .id_source("dialogue_scroll")
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .max_height((ui.available_height() - 48.0).max(120.0))
            .show(ui, |ui| {
                container = ui.clip_rect();
                for (i, line) in self.dialogue.lines().iter().enumerate() {
                    match line.speaker {
                        Speaker::Learner => {
                            ui.with_layout(egui::Layout::top_down(egui::Align::Max), |ui| {
                                ui.label(RichText::new(&line.text).color(Color32::from_rgb(165, 180, 252)));
                            });
                        }
                        Speaker::Partner => {
                            if let Some(gesture) = selectable_text(ui, ("dialogue", i), &line.text, None) {
                                gestures.push(gesture);
                            }
                        }
                    }
                    ui.add_space(8.0);
                }
                if self.dialogue.is_waiting() {
                    ui.spinner();
                }
            });
        for gesture in gestures {
            self.handle_passive_gesture(gesture, container);
        }
        if let Some(err) = self.dialogue.last_error() {
            ui.colored_label(Color32::RED, err);
        }

        let mut submit = false;
        ui.horizontal(|ui| {
            let edit = ui.add_sized(
                [(ui.available_width() - 70.0).max(100.0), 28.0],
                egui::TextEdit::singleline(&mut self.dialogue_input).hint_text("Type your message..."),
            );
            let enter = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let send = ui
                .add_enabled(!self.dialogue.is_waiting(), egui::Button::new("Send"))
                .clicked();
            submit = enter || send;
        });
        if submit {
            match self.dialogue.submit(&self.dialogue_input) {
                Ok(request) => {
                    self.close_popup();
                    self.dialogue_input.clear();
                    self.spawn_job(move || Job::Dialogue(request.run()));
                }
                Err(e) => tracing::debug!(error = %e, "dialogue line not sent"),
            }
        }
    }

    // --- Stories ---

    fn show_story_text(&mut self, ui: &mut egui::Ui, id: &str, text: Option<String>, placeholder: &str) {
        let mut gestures = Vec::new();
        let mut container = Rect::NOTHING;
        egui::ScrollArea::vertical()
            .id_source(id)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                container = ui.clip_rect();
                match &text {
                    Some(text) => {
                        if let Some(gesture) = selectable_text(ui, id, text, None) {
                            gestures.push(gesture);
                        }
                    }
                    None => {
                        ui.colored_label(Color32::GRAY, placeholder);
                    }
                }
            });
        for gesture in gestures {
            self.handle_passive_gesture(gesture, container);
        }
    }

    fn show_story(&mut self, ui: &mut egui::Ui) {
        let mut generate = false;
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.story_theme)
                    .hint_text("Enter a theme for your story (e.g., a friendly dragon)")
                    .desired_width(360.0),
            );
            let ready = self.backend.is_some() && !self.story_loading && !self.story_theme.trim().is_empty();
            generate = ui.add_enabled(ready, egui::Button::new("Generate Story")).clicked();
            if self.story_loading {
                ui.spinner();
            }
        });
        if generate {
            if let (Some(request), Some(backend)) = (
                StoryRequest::new(&self.story_theme, &self.languages.learning),
                self.backend.clone(),
            ) {
                self.close_popup();
                self.story_loading = true;
                self.spawn_job(move || Job::Story(request.run(backend.as_ref())));
            }
        }
        ui.label(RichText::new("Select any text in the story to translate it.").small());
        ui.separator();
        let story = self.story.clone();
        self.show_story_text(ui, "story_text", story, "Your AI-generated story will appear here.");
    }

    fn show_image_story(&mut self, ui: &mut egui::Ui) {
        let mut generate = false;
        egui::Grid::new("image_story_grid").num_columns(2).show(ui, |ui| {
            ui.label("Image file");
            ui.add(
                egui::TextEdit::singleline(&mut self.image_path)
                    .hint_text("/path/to/picture.png (PNG, JPG, GIF, WEBP up to 4MB)")
                    .desired_width(360.0),
            );
            ui.end_row();
            ui.label("Theme");
            ui.add(
                egui::TextEdit::singleline(&mut self.image_theme)
                    .hint_text("Enter a theme for the story")
                    .desired_width(360.0),
            );
            ui.end_row();
        });
        ui.horizontal(|ui| {
            let ready = self.backend.is_some() && !self.image_loading && !self.image_path.trim().is_empty();
            generate = ui.add_enabled(ready, egui::Button::new("Generate Story")).clicked();
            if self.image_loading {
                ui.spinner();
            }
        });
        if generate {
            let path = std::path::PathBuf::from(self.image_path.trim());
            match ImageStoryRequest::from_file(&self.image_theme, &path, &self.languages.learning) {
                Ok(request) => {
                    if let Some(backend) = self.backend.clone() {
                        self.close_popup();
                        self.image_error = None;
                        self.image_loading = true;
                        self.spawn_job(move || Job::ImageStory(request.run(backend.as_ref())));
                    }
                }
                Err(e) => self.image_error = Some(e.to_string()),
            }
        }
        if let Some(err) = &self.image_error {
            ui.colored_label(Color32::RED, err.as_str());
        }
        ui.separator();
        let story = self.image_story.clone();
        self.show_story_text(
            ui,
            "image_story_text",
            story,
            "Upload an image and provide a theme to begin.",
        );
    }

    // --- Vocabulary ---

    fn show_vocabulary(&mut self, ui: &mut egui::Ui) {
        if let Some(word) = self.deck.pending_word() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("Translating \"{}\"...", word));
            });
        }
        if self.deck.is_empty() {
            ui.vertical_centered(|ui| {
                ui.add_space(60.0);
                ui.heading("Your Vocabulary List is Empty");
                ui.label(
                    "To add words, double-click any single word in the stories or chats. \
                     It will be translated and saved here for you to review.",
                );
            });
            return;
        }

        self.flashcards.clamp(self.deck.len());
        let Some(entry) = self.flashcards.current(&self.deck).cloned() else {
            return;
        };
        let face = if self.flashcards.flipped { &entry.translation } else { &entry.word };
        let card = ui.add(
            egui::Button::new(RichText::new(face).size(32.0).strong())
                .min_size(egui::vec2(ui.available_width(), 220.0)),
        );
        if card.clicked() {
            self.flashcards.flip();
        }
        ui.horizontal(|ui| {
            ui.label(format!("{} / {}", self.flashcards.index + 1, self.deck.len()));
            if ui.button("Remove").clicked() {
                self.flashcards.remove_current(&mut self.deck);
            }
            if ui
                .add_enabled(self.deck.len() > 1, egui::Button::new("Next"))
                .clicked()
            {
                self.flashcards.next(self.deck.len());
            }
        });

        ui.separator();
        let mut remove = None;
        ui.collapsing("All words", |ui| {
            egui::ScrollArea::vertical().id_source("vocab_list").show(ui, |ui| {
                egui::Grid::new("vocab_grid").striped(true).num_columns(3).show(ui, |ui| {
                    for entry in self.deck.entries() {
                        ui.label(entry.word.as_str());
                        ui.label(entry.translation.as_str());
                        if ui.small_button("Remove").clicked() {
                            remove = Some(entry.id);
                        }
                        ui.end_row();
                    }
                });
            });
        });
        if let Some(id) = remove {
            self.deck.remove(id);
            self.flashcards.clamp(self.deck.len());
        }
    }

    fn show_about(&self, ui: &mut egui::Ui) {
        ui.heading("About LingoRPG");
        ui.label(
            "LingoRPG is an interactive text adventure that makes learning a language fun. \
             A generative narrator acts as your Dungeon Master and guides a story you shape \
             with your own decisions, in the language you are learning.",
        );
        ui.add_space(8.0);
        ui.heading("How It Works");
        ui.label(
            "Start an adventure with a theme and respond to each scene by typing what you do. \
             When your sentence has mistakes, the narrator shows a corrected version first.",
        );
        ui.add_space(8.0);
        ui.heading("Key Features");
        ui.label("• Text-to-speech narration: play a message, or click any sentence to hear it.");
        ui.label("• Vocabulary builder: double-click a word to translate and save it.");
        ui.label("• On-the-fly translation: select a phrase to see it in your native language.");
        ui.label("• Dialogue practice and short stories from a theme or an image.");
    }
}

impl App for LingoApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.apply_jobs();
        self.narration.pump();
        if self.tab == Tab::Adventure {
            if let Some(msg) = self.adventure.take_autoplay() {
                self.narration.play_from_sentence(&msg, 0);
            }
        }

        let previous_tab = self.tab;
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("LingoRPG");
                ui.separator();
                for tab in Tab::ALL {
                    ui.selectable_value(&mut self.tab, tab, tab.label());
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("⚙ Settings").clicked() {
                        self.show_settings = !self.show_settings;
                    }
                    ui.label(
                        RichText::new(format!(
                            "{} → {}",
                            language_name(&self.languages.learning),
                            language_name(&self.languages.native)
                        ))
                        .small(),
                    );
                });
            });
            if let Some(err) = &self.config_error {
                ui.colored_label(Color32::RED, format!("Config: {}", err));
            }
            if let Some(err) = &self.backend_error {
                ui.colored_label(Color32::RED, format!("Backend unavailable: {}", err));
            }
        });
        if self.tab != previous_tab {
            if previous_tab == Tab::Adventure {
                self.narration.stop();
            }
            self.close_popup();
        }

        egui::CentralPanel::default().show(ctx, |ui| match self.tab {
            Tab::Adventure => self.show_adventure(ui),
            Tab::Dialogue => self.show_dialogue(ui),
            Tab::Story => self.show_story(ui),
            Tab::ImageStory => self.show_image_story(ui),
            Tab::Vocabulary => self.show_vocabulary(ui),
            Tab::About => self.show_about(ui),
        });

        self.show_translation_popup(ctx);
        if self.show_settings {
            self.show_settings_window(ctx);
        }

        if self.narration.status() != PlaybackStatus::Idle {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

fn main() -> Result<(), eframe::Error> {
    let args = CliArgs::parse();
    init_tracing(&args);

    let (mut config, mut config_error) = match load_config_from_file(&args.config) {
        Ok(config) => (config, None),
        Err(e) => {
            tracing::error!(error = %e, "failed to load config, using defaults");
            (Config::default(), Some(e.to_string()))
        }
    };
    config.apply_overrides(&args);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration after overrides");
        if config_error.is_none() {
            config_error = Some(e.to_string());
        }
    }

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 800.0])
            .with_min_inner_size([720.0, 560.0]),
        ..Default::default()
    };
    eframe::run_native(
        "LingoRPG",
        options,
        Box::new(move |cc| Box::new(LingoApp::new(cc, config, config_error))),
    )
}
