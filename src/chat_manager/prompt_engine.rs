use serde::{Deserialize, Serialize};

use super::config::{ChatConfig, PromptOrder};
use super::lorebook_matcher::{active_entries, format_lorebook_for_prompt};
use super::types::{Character, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Provider-neutral prompt. `turns` starts with the system turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system_instruction: String,
    pub turns: Vec<ChatTurn>,
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(s)
}

fn instruction_section(character: &Character, config: &ChatConfig) -> String {
    let mut out = match non_blank(&config.system_prompt_override) {
        Some(over) => over.to_string(),
        None => character.system_instruction.clone(),
    };
    let example = non_blank(&config.example_dialogue)
        .or_else(|| character.example_dialogue.as_deref().and_then(non_blank));
    if let Some(ex) = example {
        out.push_str("\n\n[EXAMPLE DIALOGUE]\n");
        out.push_str(ex);
    }
    out
}

fn user_section(config: &ChatConfig) -> String {
    let name = config.user_name.trim();
    let description = config.user_description.trim();
    if name == "User" && description.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n[USER INFO]");
    if !name.is_empty() {
        out.push_str(&format!("\nName: {}", name));
    }
    if !description.is_empty() {
        out.push_str(&format!("\nDescription: {}", description));
    }
    out.push_str("\nRole: User/Interlocutor");
    out
}

fn tagged_section(tag: &str, body: &str) -> String {
    match non_blank(body) {
        Some(body) => format!("\n\n[{}]\n{}", tag, body),
        None => String::new(),
    }
}

/// Builds the system instruction from its five sections in the configured order.
pub fn build_system_instruction(
    character: &Character,
    config: &ChatConfig,
    history: &[Message],
) -> String {
    let instruction = instruction_section(character, config);
    let user = user_section(config);
    let scenario = tagged_section("SCENARIO", &config.scenario);
    let entries = active_entries(
        &config.lorebook,
        history,
        config.lorebook_keyword_gating,
        config.lorebook_scan_depth,
    );
    let world = tagged_section("WORLD INFO / LOREBOOK", &format_lorebook_for_prompt(&entries));
    let note = tagged_section("AUTHOR'S NOTE", &config.authors_note);

    match config.prompt_order {
        PromptOrder::Default => [instruction, user, scenario, world, note].concat(),
        PromptOrder::StyleFirst => {
            [note, "\n\n".to_string(), instruction, scenario, world, user].concat()
        }
        PromptOrder::ScenarioLast => [instruction, user, world, note, scenario].concat(),
    }
}

fn roleplay_system_turn(character: &Character, system_instruction: &str) -> String {
    let name = &character.name;
    let mut out = format!(
        "You are {}. You must stay completely in character at all times.\n\n",
        name
    );
    if let Some(instruction) = non_blank(system_instruction) {
        out.push_str(instruction.trim());
        out.push_str("\n\n");
    }
    if let Some(desc) = non_blank(&character.description) {
        out.push_str(&format!("[Character Description: {}]\n\n", desc.trim()));
    }
    out.push_str("IMPORTANT INSTRUCTIONS:\n");
    out.push_str(&format!("- You ARE {}. Never break character.\n", name));
    out.push_str(&format!(
        "- Respond naturally as {} would, with their personality, speech patterns, and mannerisms.\n",
        name
    ));
    out.push_str("- Never mention you are an AI, language model, or assistant.\n");
    out.push_str("- Use descriptive actions in *asterisks* when appropriate.\n");
    out.push_str("- Engage emotionally with the scene and the user.\n");
    out.push_str("- Stay immersed in the roleplay scenario.");
    out
}

/// Assembles the prompt for one generation. `history` is the transcript up
/// to and including the user's latest message; thinking placeholders are
/// skipped. No truncation happens here.
pub fn assemble(character: &Character, config: &ChatConfig, history: &[Message]) -> AssembledPrompt {
    let system_instruction = build_system_instruction(character, config, history);
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(ChatTurn::new(
        TurnRole::System,
        roleplay_system_turn(character, &system_instruction),
    ));

    let has_model_turn = history
        .iter()
        .any(|m| m.role == Role::Model && !m.is_thinking);
    if !has_model_turn {
        if let Some(first) = non_blank(&character.first_message) {
            turns.push(ChatTurn::new(TurnRole::Assistant, first));
        }
    }

    for message in history.iter().filter(|m| !m.is_thinking) {
        let role = match message.role {
            Role::User => TurnRole::User,
            Role::Model => TurnRole::Assistant,
        };
        turns.push(ChatTurn::new(role, message.content.clone()));
    }

    AssembledPrompt {
        system_instruction,
        turns,
    }
}

/// Single prompt string for text-completion servers. Ends with the model
/// prefix as the completion cue.
pub fn flatten_for_text(prompt: &AssembledPrompt, config: &ChatConfig) -> String {
    let user_prefix = config.user_prefix.trim();
    let model_prefix = config.model_prefix.trim();
    let mut lines: Vec<String> = prompt
        .turns
        .iter()
        .map(|turn| match turn.role {
            TurnRole::System => turn.content.clone(),
            TurnRole::User => format!("{} {}", user_prefix, turn.content),
            TurnRole::Assistant => format!("{} {}", model_prefix, turn.content),
        })
        .collect();
    lines.push(model_prefix.to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::types::LorebookEntry;

    fn make_character() -> Character {
        Character {
            id: "alice.png".into(),
            name: "Alice".into(),
            avatar: "/characters/alice.png".into(),
            description: "A curious traveller.".into(),
            system_instruction: "CHAR_INSTRUCTION".into(),
            first_message: "Hello, stranger.".into(),
            example_dialogue: None,
            background_image: String::new(),
        }
    }

    fn make_config() -> ChatConfig {
        let mut config = ChatConfig::default();
        config.user_name = "Bob".into();
        config.scenario = "SCENARIO_TEXT".into();
        config.authors_note = "NOTE_TEXT".into();
        config.lorebook = vec![LorebookEntry {
            id: "l1".into(),
            keys: vec!["castle".into()],
            content: "WORLD_TEXT".into(),
            enabled: true,
        }];
        config
    }

    fn positions(s: &str) -> (usize, usize, usize, usize, usize) {
        (
            s.find("CHAR_INSTRUCTION").unwrap(),
            s.find("[USER INFO]").unwrap(),
            s.find("SCENARIO_TEXT").unwrap(),
            s.find("WORLD_TEXT").unwrap(),
            s.find("NOTE_TEXT").unwrap(),
        )
    }

    #[test]
    fn default_order() {
        let s = build_system_instruction(&make_character(), &make_config(), &[]);
        let (i, u, sc, w, n) = positions(&s);
        assert!(i < u && u < sc && sc < w && w < n);
        assert!(s.contains("\n\n[USER INFO]\nName: Bob\nRole: User/Interlocutor"));
    }

    #[test]
    fn style_first_order() {
        let mut config = make_config();
        config.prompt_order = PromptOrder::StyleFirst;
        let s = build_system_instruction(&make_character(), &config, &[]);
        let (i, u, sc, w, n) = positions(&s);
        assert!(n < i && i < sc && sc < w && w < u);
        assert!(s.starts_with("\n\n[AUTHOR'S NOTE]\nNOTE_TEXT\n\nCHAR_INSTRUCTION"));
    }

    #[test]
    fn scenario_last_order() {
        let mut config = make_config();
        config.prompt_order = PromptOrder::ScenarioLast;
        let s = build_system_instruction(&make_character(), &config, &[]);
        let (i, u, sc, w, n) = positions(&s);
        assert!(i < u && u < w && w < n && n < sc);
        assert!(s.ends_with("[SCENARIO]\nSCENARIO_TEXT"));
    }

    #[test]
    fn override_replaces_character_instruction() {
        let mut config = make_config();
        config.system_prompt_override = "OVERRIDE".into();
        let s = build_system_instruction(&make_character(), &config, &[]);
        assert!(s.contains("OVERRIDE"));
        assert!(!s.contains("CHAR_INSTRUCTION"));

        config.system_prompt_override = "   ".into();
        let s = build_system_instruction(&make_character(), &config, &[]);
        assert!(s.contains("CHAR_INSTRUCTION"));
    }

    #[test]
    fn default_user_without_description_is_omitted() {
        let mut config = make_config();
        config.user_name = "User".into();
        let s = build_system_instruction(&make_character(), &config, &[]);
        assert!(!s.contains("[USER INFO]"));

        config.user_description = "Tall".into();
        let s = build_system_instruction(&make_character(), &config, &[]);
        assert!(s.contains("[USER INFO]\nName: User\nDescription: Tall"));
    }

    #[test]
    fn blank_sections_are_skipped() {
        let config = ChatConfig::default();
        let s = build_system_instruction(&make_character(), &config, &[]);
        assert_eq!(s, "CHAR_INSTRUCTION");
    }

    #[test]
    fn example_dialogue_follows_instruction() {
        let mut character = make_character();
        character.example_dialogue = Some("<START>\nAlice: Hm.".into());
        let s = build_system_instruction(&character, &ChatConfig::default(), &[]);
        assert_eq!(s, "CHAR_INSTRUCTION\n\n[EXAMPLE DIALOGUE]\n<START>\nAlice: Hm.");
    }

    #[test]
    fn gated_lorebook_needs_keyword() {
        let mut config = make_config();
        config.lorebook_keyword_gating = true;
        let quiet = vec![Message::new(Role::User, "hello", 1)];
        assert!(!build_system_instruction(&make_character(), &config, &quiet).contains("WORLD_TEXT"));
        let loud = vec![Message::new(Role::User, "to the castle!", 1)];
        assert!(build_system_instruction(&make_character(), &config, &loud).contains("WORLD_TEXT"));
    }

    #[test]
    fn turns_seed_first_message_when_no_model_turn() {
        let history = vec![Message::new(Role::User, "Hi", 1)];
        let prompt = assemble(&make_character(), &make_config(), &history);
        assert_eq!(prompt.turns.len(), 3);
        assert_eq!(prompt.turns[0].role, TurnRole::System);
        assert!(prompt.turns[0]
            .content
            .starts_with("You are Alice. You must stay completely in character at all times."));
        assert!(prompt.turns[0].content.contains("IMPORTANT INSTRUCTIONS:"));
        assert!(prompt.turns[0].content.contains("[Character Description: A curious traveller.]"));
        assert_eq!(prompt.turns[1], ChatTurn::new(TurnRole::Assistant, "Hello, stranger."));
        assert_eq!(prompt.turns[2], ChatTurn::new(TurnRole::User, "Hi"));
    }

    #[test]
    fn history_maps_one_to_one_and_skips_placeholder() {
        let history = vec![
            Message::new(Role::Model, "Hello, stranger.", 1),
            Message::new(Role::User, "Hi", 2),
            Message::thinking(3),
        ];
        let prompt = assemble(&make_character(), &make_config(), &history);
        let roles: Vec<TurnRole> = prompt.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::System, TurnRole::Assistant, TurnRole::User]
        );
    }

    #[test]
    fn flattened_prompt_uses_prefixes() {
        let history = vec![
            Message::new(Role::Model, "Hello.", 1),
            Message::new(Role::User, "Hi", 2),
        ];
        let config = make_config();
        let prompt = assemble(&make_character(), &config, &history);
        let text = flatten_for_text(&prompt, &config);
        assert!(text.starts_with("You are Alice."));
        assert!(text.ends_with("\nCharacter: Hello.\nUser: Hi\nCharacter:"));
    }
}
