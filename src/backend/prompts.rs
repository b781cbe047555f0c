use crate::settings::language_name;
use crate::types::session::Difficulty;

pub const ADVENTURE_TEMPERATURE: f32 = 0.8;
pub const DIALOGUE_TEMPERATURE: f32 = 0.8;
pub const STORY_TEMPERATURE: f32 = 0.7;
pub const STORY_MAX_OUTPUT_TOKENS: u32 = 500;

fn difficulty_instruction(difficulty: Difficulty, language: &str) -> String {
    match difficulty {
        Difficulty::Basic => format!(
            "The story and language used should be suitable for a basic {language} learner (A1/A2 CEFR level). Use simple vocabulary and sentence structures."
        ),
        Difficulty::Intermediate => format!(
            "The story and language used should be suitable for an intermediate {language} learner (B1/B2 CEFR level). Use a broader range of vocabulary and more complex sentences."
        ),
        Difficulty::Advanced => format!(
            "The story and language used should be suitable for an advanced {language} learner (C1/C2 CEFR level). Use rich, nuanced vocabulary and varied, complex sentence structures."
        ),
    }
}

/// System instruction for the adventure narrator. The correction rule here
/// is what `parse_response` relies on.
pub fn adventure_instruction(difficulty: Difficulty, player_count: usize, learning: &str) -> String {
    let language = language_name(learning);
    let level = difficulty_instruction(difficulty, language);
    format!(
        r#"You are a Dungeon Master for a tabletop RPG. Your goal is to create a compelling, interactive story for a group of {players} players who are learning {language}. Write everything in {language}.

**1. Game Structure & Player Management:**
- **Number of Players:** {players}. The players are referred to as "Player 1", "Player 2", ..., "Player {players}".
- **Turn-Based Interaction:** The game is turn-based. You narrate the story and the state of the world, and you MUST end your response by prompting the CURRENT player for their action.
- **Character Introduction:** In your very first message, introduce the setting based on the theme, and introduce the {players} player characters with simple, distinct roles.
- **Player Actions:** The user's input is the action of the currently prompted player. Your narrative reflects the outcome of that action.
- **Advancing Turns:** After narrating the result of an action from "Player X", prompt the next player in sequence ("Player X+1"). After the last player, the next turn belongs to "Player 1".

**2. Core Principles:**
- The players are the heroes; their choices have a visible impact on the world.
- Describe, don't just tell: use sensory details.
- Fail forward: a failed action introduces a new complication instead of stopping the story.
- "Yes, and...": build on the players' ideas.

**3. Player Interaction & Correction Rule:**
- CRITICAL RULE: if the player's input contains grammatical or spelling errors, your response MUST begin with a single line containing the corrected input, prefixed with 'Correction: ' and enclosed in quotes. If there are no errors, do not add this line and start the narrative directly.
- After the optional correction, continue the narrative and ALWAYS end by prompting the next player.

**4. Language Level:**
- {level}

Begin the adventure based on the chosen theme: create an immersive opening scene, introduce the characters, and present the first player with their initial situation."#,
        players = player_count,
        language = language,
        level = level,
    )
}

pub fn adventure_opening(theme: &str) -> String {
    format!("Start the adventure with the theme: \"{}\".", theme)
}

pub fn dialogue_instruction(learning: &str) -> String {
    let language = language_name(learning);
    format!(
        "You are an AI assistant helping a user practice {language}. Engage in a simple, friendly conversation in {language} based on the user's chosen scenario. Keep your responses short, helpful, and easy to understand for a beginner."
    )
}

pub fn dialogue_opening(scenario: &str) -> String {
    format!(
        "Let's start our conversation. The scenario is: \"{}\". You can start.",
        scenario
    )
}

pub fn story_prompt(theme: &str, learning: &str) -> String {
    let language = language_name(learning);
    format!(
        "Generate a short and simple story in {language} for a beginner language learner based on the theme: \"{theme}\". The story should be easy to understand, consisting of 3 to 5 paragraphs."
    )
}

pub fn image_story_prompt(theme: &str, learning: &str) -> String {
    let language = language_name(learning);
    format!(
        "As a creative storyteller for someone learning {language}, write a short, simple, and imaginative story in {language} inspired by this image. The user has provided the following theme to guide you: \"{theme}\". Keep the language easy for a beginner."
    )
}

pub fn translation_prompt(text: &str, from: &str, to: &str) -> String {
    format!(
        "Translate the following {} text to {}. Reply with the translation only: \"{}\"",
        language_name(from),
        language_name(to),
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adventure_instruction_mentions_players_level_and_language() {
        let text = adventure_instruction(Difficulty::Advanced, 3, "es");
        assert!(text.contains("group of 3 players"));
        assert!(text.contains("\"Player 3\""));
        assert!(text.contains("C1/C2"));
        assert!(text.contains("learning Español"));
        assert!(text.contains("'Correction: '"));
    }

    #[test]
    fn opening_lines_quote_their_subject() {
        assert_eq!(
            adventure_opening("a haunted forest"),
            "Start the adventure with the theme: \"a haunted forest\"."
        );
        assert!(dialogue_opening("Asking for directions").contains("\"Asking for directions\""));
    }

    #[test]
    fn translation_prompt_names_both_languages() {
        let prompt = translation_prompt("cave", "en", "pt");
        assert!(prompt.contains("English"));
        assert!(prompt.contains("Português"));
        assert!(prompt.ends_with("\"cave\""));
    }
}
