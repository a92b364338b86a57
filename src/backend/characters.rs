use serde_json::Value;

use crate::chat_manager::types::Character;
use crate::serde_utils::non_empty_str;

/// Maps one backend character record. Records without an avatar key are
/// skipped since the avatar file name is the character's identity.
pub fn character_from_record(record: &Value) -> Option<Character> {
    let avatar = non_empty_str(record, "avatar")?;
    let name = non_empty_str(record, "name").unwrap_or(avatar);

    let mut instruction = String::new();
    if let Some(personality) = non_empty_str(record, "personality") {
        instruction.push_str(personality);
        instruction.push_str("\n\n");
    }
    if let Some(scenario) = non_empty_str(record, "scenario") {
        instruction.push_str(&format!("[Scenario: {}]\n\n", scenario));
    }
    if let Some(system_prompt) = non_empty_str(record, "system_prompt") {
        instruction.push_str(system_prompt);
        instruction.push_str("\n\n");
    }
    if let Some(post) = non_empty_str(record, "post_history_instructions") {
        instruction.push_str(&format!("[Instructions: {}]\n\n", post));
    }

    Some(Character {
        id: avatar.to_string(),
        name: name.to_string(),
        avatar: format!("/characters/{}", avatar),
        description: non_empty_str(record, "description").unwrap_or_default().to_string(),
        system_instruction: instruction.trim().to_string(),
        first_message: non_empty_str(record, "first_mes").unwrap_or_default().to_string(),
        example_dialogue: non_empty_str(record, "mes_example").map(str::to_string),
        background_image: String::new(),
    })
}
