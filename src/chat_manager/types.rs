use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Set only on the placeholder of a pending generation. Never persisted.
    #[serde(default, skip_serializing)]
    pub is_thinking: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: format!("{}-{}", timestamp, uuid::Uuid::new_v4().simple()),
            role,
            content: content.into(),
            timestamp,
            is_thinking: false,
        }
    }

    pub fn thinking(timestamp: u64) -> Self {
        Self {
            is_thinking: true,
            ..Self::new(Role::Model, "", timestamp)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Opaque backend key (the avatar file name).
    pub id: String,
    pub name: String,
    pub avatar: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_dialogue: Option<String>,
    #[serde(default)]
    pub background_image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LorebookEntry {
    pub id: String,
    #[serde(default)]
    pub keys: Vec<String>,
    pub content: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPersistenceState {
    pub character_id: String,
    pub messages: Vec<Message>,
    pub last_updated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "zh-CN")]
    ZhCn,
    #[serde(rename = "zh-TW")]
    ZhTw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub auto_restore_chat: bool,
    pub show_persona_switch_notification: bool,
    pub active_persona_id: Option<String>,
    pub language: Language,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_restore_chat: true,
            show_persona_switch_notification: true,
            active_persona_id: None,
            language: Language::En,
        }
    }
}
