// Library crate for the LingoRPG desktop app. The binary in main.rs is only
// the egui shell; every piece of behavior lives here.
pub mod config;
pub mod error;
pub mod logging;
pub mod types {
    pub mod session;
}
pub mod parsing;
pub mod storage;
pub mod settings;
pub mod backend;
pub mod speech;
pub mod playback;
pub mod selection;
pub mod adventure;
pub mod vocab;
pub mod modes;
pub mod worker;

pub use adventure::{AdventureSession, TurnReply, TurnRequest};
pub use config::Config;
pub use playback::{NarrationController, PlaybackStatus};
pub use vocab::VocabularyDeck;
