//! Practice modes that sit beside the adventure.

pub mod dialogue;
pub mod image_story;
pub mod story;
pub mod translation;
