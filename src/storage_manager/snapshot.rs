use serde_json::Value;
use tokio::task::JoinHandle;

use super::local_store::LocalStore;
use crate::chat_manager::types::{AppSettings, ChatPersistenceState, Message};
use crate::coalescer::{Coalescer, SNAPSHOT_DEBOUNCE};
use crate::utils::{log_info, log_warn, now_millis};

const CHAT_STATE_KEY: &str = "chat_state";
const APP_SETTINGS_KEY: &str = "app_settings";

pub fn save_local_snapshot(
    store: &LocalStore,
    character_id: &str,
    messages: &[Message],
) -> Result<(), String> {
    let state = ChatPersistenceState {
        character_id: character_id.to_string(),
        messages: messages.iter().filter(|m| !m.is_thinking).cloned().collect(),
        last_updated: now_millis(),
    };
    store.set_json(CHAT_STATE_KEY, &state)
}

/// The stored snapshot, if one exists and names a character. A corrupt
/// snapshot is treated as absent.
pub fn load_local_snapshot(store: &LocalStore) -> Option<ChatPersistenceState> {
    match store.get_json::<ChatPersistenceState>(CHAT_STATE_KEY) {
        Ok(Some(state)) if !state.character_id.is_empty() => Some(state),
        Ok(_) => None,
        Err(err) => {
            log_warn("snapshot", format!("discarding unreadable snapshot: {}", err));
            None
        }
    }
}

pub fn clear_local_snapshot(store: &LocalStore) -> Result<(), String> {
    store.remove_both(CHAT_STATE_KEY)
}

pub fn load_app_settings(store: &LocalStore) -> AppSettings {
    store
        .get_json::<AppSettings>(APP_SETTINGS_KEY)
        .unwrap_or_else(|err| {
            log_warn("snapshot", format!("app settings unreadable: {}", err));
            None
        })
        .unwrap_or_default()
}

/// Merges `patch` (a partial camelCase object) over the stored settings.
pub fn update_app_settings(store: &LocalStore, patch: &Value) -> Result<AppSettings, String> {
    let current = load_app_settings(store);
    let mut merged = serde_json::to_value(&current).map_err(|e| e.to_string())?;
    if let (Some(target), Some(updates)) = (merged.as_object_mut(), patch.as_object()) {
        for (key, value) in updates {
            target.insert(key.clone(), value.clone());
        }
    }
    let settings: AppSettings = serde_json::from_value(merged).map_err(|e| e.to_string())?;
    store.set_json(APP_SETTINGS_KEY, &settings)?;
    Ok(settings)
}

/// Debounced snapshot writes. Only the last state scheduled within the
/// window reaches storage.
#[derive(Clone)]
pub struct SnapshotWriter {
    store: LocalStore,
    coalescer: Coalescer,
}

impl SnapshotWriter {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            coalescer: Coalescer::new("snapshot", SNAPSHOT_DEBOUNCE),
        }
    }

    pub fn schedule(&self, character_id: String, messages: Vec<Message>) -> JoinHandle<bool> {
        let store = self.store.clone();
        self.coalescer.schedule(async move {
            match save_local_snapshot(&store, &character_id, &messages) {
                Ok(()) => log_info(
                    "snapshot",
                    format!("saved {} messages for {}", messages.len(), character_id),
                ),
                Err(err) => log_warn("snapshot", format!("snapshot write failed: {}", err)),
            }
        })
    }

    pub fn cancel(&self) {
        self.coalescer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::types::{Language, Role};
    use serde_json::json;

    #[test]
    fn snapshot_save_load_clear() {
        let store = LocalStore::in_memory().unwrap();
        assert!(load_local_snapshot(&store).is_none());

        let messages = vec![
            Message::new(Role::Model, "hi", 1),
            Message::new(Role::User, "hello", 2),
            Message::thinking(3),
        ];
        save_local_snapshot(&store, "alice.png", &messages).unwrap();
        let state = load_local_snapshot(&store).unwrap();
        assert_eq!(state.character_id, "alice.png");
        assert_eq!(state.messages.len(), 2);
        assert!(store.get("etheria_chat_state").unwrap().is_some());

        clear_local_snapshot(&store).unwrap();
        assert!(load_local_snapshot(&store).is_none());
        assert!(store.get("etheria_chat_state").unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let store = LocalStore::in_memory().unwrap();
        store.set("romanbath_chat_state", "{not json").unwrap();
        assert!(load_local_snapshot(&store).is_none());
    }

    #[test]
    fn app_settings_merge_over_defaults() {
        let store = LocalStore::in_memory().unwrap();
        store
            .set("etheria_app_settings", r#"{"language":"zh-TW"}"#)
            .unwrap();
        let settings = load_app_settings(&store);
        assert_eq!(settings.language, Language::ZhTw);
        assert!(settings.auto_restore_chat);

        let updated = update_app_settings(&store, &json!({ "autoRestoreChat": false })).unwrap();
        assert!(!updated.auto_restore_chat);
        assert_eq!(updated.language, Language::ZhTw);
        assert_eq!(load_app_settings(&store), updated);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_keeps_only_last_state() {
        let store = LocalStore::in_memory().unwrap();
        let writer = SnapshotWriter::new(store.clone());
        let first = writer.schedule("a.png".into(), vec![Message::new(Role::User, "one", 1)]);
        let second = writer.schedule(
            "a.png".into(),
            vec![
                Message::new(Role::User, "one", 1),
                Message::new(Role::Model, "two", 2),
            ],
        );
        assert!(!first.await.unwrap());
        assert!(second.await.unwrap());
        assert_eq!(load_local_snapshot(&store).unwrap().messages.len(), 2);
    }
}
