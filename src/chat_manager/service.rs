use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};

use super::config::{apply_to_remote_settings, merge_remote_settings, ChatConfig, ResponseStyle};
use super::generation::TextGenerator;
use super::prompt_engine::assemble;
use super::types::{Character, Message, Role};
use crate::abort_manager::AbortRegistry;
use crate::backend::{ChatArchive, SettingsStore};
use crate::coalescer::{Coalescer, REMOTE_AUTOSAVE_DEBOUNCE};
use crate::error::{ChatError, GenerationErrorKind};
use crate::providers::verify::{ConnectionTestResult, ConnectionTester};
use crate::secrets::KeyStore;
use crate::storage_manager::chat_files::{
    describe_since, list_remote, load_remote, new_chat_file_name, save_remote, strip_chat_extension,
};
use crate::storage_manager::snapshot::{clear_local_snapshot, load_app_settings, load_local_snapshot};
use crate::storage_manager::{LocalStore, PersonaLibrary, SnapshotWriter};
use crate::utils::{log_error, log_info, log_warn, now_millis};

/// Shown in place of a reply when generation fails for any reason.
pub const FAILURE_MESSAGE: &str = "ERROR: Connection severed. The ether is silent.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The placeholder was resolved, with the reply or the failure message.
    Completed(Message),
    /// The user cancelled; the placeholder was removed.
    Cancelled,
    /// The transcript moved on (switch, new chat, restore) while generating.
    Abandoned,
}

/// A previous session that can be resumed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOffer {
    pub character: Character,
    pub messages: Vec<Message>,
    pub last_updated: u64,
    /// e.g. "3 hours ago".
    pub age: String,
}

#[derive(Default)]
struct Transcript {
    character: Option<Character>,
    messages: Vec<Message>,
    chat_file_name: Option<String>,
    /// Bumped whenever the transcript is replaced. Completions tagged with
    /// an older epoch are dropped.
    epoch: u64,
    pending: Option<String>,
    /// Set while a character switch is still fetching its remote chat.
    loading: bool,
}

impl Transcript {
    fn replace(&mut self, character: Character, messages: Vec<Message>, file_name: Option<String>) -> u64 {
        self.epoch += 1;
        self.character = Some(character);
        self.messages = messages;
        self.chat_file_name = file_name;
        self.pending = None;
        self.loading = false;
        self.epoch
    }

    fn is_busy(&self) -> bool {
        self.pending.is_some() || self.loading
    }
}

fn greeting(character: &Character) -> Vec<Message> {
    let first = character.first_message.trim();
    if first.is_empty() {
        Vec::new()
    } else {
        vec![Message::new(Role::Model, first, now_millis())]
    }
}

/// Collaborators handed to [`ChatService::new`].
pub struct ChatServiceParts {
    pub local: LocalStore,
    pub keys: KeyStore,
    pub archive: Arc<dyn ChatArchive>,
    pub settings: Arc<dyn SettingsStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub tester: ConnectionTester,
}

/// Owns the config, the current transcript and the key cache. Locks are
/// never held across an await.
pub struct ChatService {
    config: Mutex<ChatConfig>,
    raw_settings: Mutex<Value>,
    state: Mutex<Transcript>,
    local: LocalStore,
    keys: KeyStore,
    archive: Arc<dyn ChatArchive>,
    settings: Arc<dyn SettingsStore>,
    generator: Arc<dyn TextGenerator>,
    tester: ConnectionTester,
    personas: PersonaLibrary,
    aborts: AbortRegistry,
    snapshots: SnapshotWriter,
    remote_autosave: Coalescer,
}

impl ChatService {
    pub fn new(parts: ChatServiceParts) -> Self {
        Self {
            config: Mutex::new(ChatConfig::default()),
            raw_settings: Mutex::new(json!({})),
            state: Mutex::new(Transcript::default()),
            snapshots: SnapshotWriter::new(parts.local.clone()),
            personas: PersonaLibrary::new(parts.local.clone()),
            local: parts.local,
            keys: parts.keys,
            archive: parts.archive,
            settings: parts.settings,
            generator: parts.generator,
            tester: parts.tester,
            aborts: AbortRegistry::new(),
            remote_autosave: Coalescer::new("remote_autosave", REMOTE_AUTOSAVE_DEBOUNCE),
        }
    }

    pub fn config(&self) -> ChatConfig {
        lock(&self.config).clone()
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.state).messages.clone()
    }

    pub fn current_character(&self) -> Option<Character> {
        lock(&self.state).character.clone()
    }

    pub fn chat_file_name(&self) -> Option<String> {
        lock(&self.state).chat_file_name.clone()
    }

    /// True while a reply is pending or a character switch is loading.
    pub fn is_busy(&self) -> bool {
        lock(&self.state).is_busy()
    }

    pub fn personas(&self) -> &PersonaLibrary {
        &self.personas
    }

    /// Remote settings merged over defaults; defaults alone when the backend
    /// is unreachable. The key comes from the key store when it has one.
    pub async fn load_config(&self) -> ChatConfig {
        let mut config = ChatConfig::default();
        match self.settings.load_settings().await {
            Ok(raw) => {
                merge_remote_settings(&mut config, &raw);
                *lock(&self.raw_settings) = raw;
            }
            Err(err) => log_warn("chat_service", format!("remote settings unavailable: {}", err)),
        }
        let mut config = config.normalized();
        if let Some(key) = self.keys.resolve_key(&config.main_api).await {
            config.api_key = key;
        }
        log_info("chat_service", format!("config loaded for {}", config.main_api));
        *lock(&self.config) = config.clone();
        config
    }

    async fn persist_config(&self, config: &ChatConfig) {
        let raw = {
            let mut raw = lock(&self.raw_settings);
            let updated = apply_to_remote_settings(config, &raw);
            *raw = updated.clone();
            updated
        };
        if let Err(err) = self.settings.save_settings(&raw).await {
            log_warn("chat_service", format!("saving settings failed: {}", err));
        }
    }

    pub async fn update_config(&self, config: ChatConfig) -> ChatConfig {
        let config = config.normalized();
        *lock(&self.config) = config.clone();
        self.persist_config(&config).await;
        config
    }

    pub async fn apply_response_style(&self, style: ResponseStyle) -> ChatConfig {
        let config = {
            let mut config = lock(&self.config);
            config.apply_response_style(style);
            config.clone()
        };
        self.persist_config(&config).await;
        config
    }

    /// Switches provider, resetting its URL to the default and loading its
    /// stored key.
    pub async fn select_provider(&self, provider_id: &str) -> Result<ChatConfig, ChatError> {
        let mut config = self.config();
        config
            .select_provider(provider_id)
            .map_err(|e| ChatError::Config(e.message))?;
        if let Some(key) = self.keys.resolve_key(provider_id).await {
            config.api_key = key;
        }
        *lock(&self.config) = config.clone();
        self.persist_config(&config).await;
        Ok(config)
    }

    /// Stores the key for the current provider and probes the connection.
    pub async fn update_api_key(&self, key: &str) -> Result<ConnectionTestResult, ChatError> {
        let config = {
            let mut config = lock(&self.config);
            config.api_key = key.trim().to_string();
            config.clone()
        };
        self.keys
            .set_key(&config.main_api, key)
            .map_err(ChatError::Config)?;
        self.persist_config(&config).await;

        let base_url = Some(config.api_url.as_str()).filter(|u| !u.trim().is_empty());
        let api_key = Some(config.api_key.as_str()).filter(|k| !k.is_empty());
        let model = Some(config.model_name.as_str()).filter(|m| !m.trim().is_empty());
        let result = self
            .tester
            .test(&config.main_api, api_key, base_url, model)
            .await;
        log_info(
            "chat_service",
            format!("{} connection: {}", config.main_api, result.message),
        );
        Ok(result)
    }

    /// Copies the persona into the user fields, marks it active and saves
    /// the config.
    pub async fn apply_persona(&self, persona_id: &str) -> Result<ChatConfig, ChatError> {
        let persona = self
            .personas
            .get(persona_id)
            .map_err(ChatError::Config)?
            .ok_or_else(|| ChatError::Config(format!("Persona not found: {}", persona_id)))?;
        self.personas
            .set_active_id(Some(&persona.id))
            .map_err(ChatError::Config)?;
        let config = {
            let mut config = lock(&self.config);
            config.user_name = persona.name.clone();
            config.user_description = persona.description.clone();
            config.clone()
        };
        self.persist_config(&config).await;
        log_info("chat_service", format!("applied persona {}", persona.id));
        Ok(config)
    }

    fn invalidate_pending(&self) {
        let aborted = self.aborts.abort_all();
        if aborted > 0 {
            log_info("chat_service", format!("abandoned {} pending generation(s)", aborted));
        }
    }

    /// Loads the character's most recent remote chat, or starts a fresh
    /// transcript with its greeting when there is none.
    pub async fn switch_character(&self, character: Character) -> Vec<Message> {
        let epoch = {
            let mut state = lock(&self.state);
            let epoch = state.replace(character.clone(), Vec::new(), None);
            state.loading = true;
            epoch
        };
        self.invalidate_pending();

        let chats = list_remote(self.archive.as_ref(), &character.id).await;
        let mut loaded = None;
        if let Some(latest) = chats.first() {
            match load_remote(self.archive.as_ref(), &character.id, &latest.file_name, now_millis()).await {
                Ok(messages) if !messages.is_empty() => {
                    loaded = Some((messages, strip_chat_extension(&latest.file_name).to_string()));
                }
                Ok(_) => {}
                Err(err) => log_warn("chat_service", format!("loading {} failed: {}", latest.file_name, err)),
            }
        }

        let (messages, file_name) = loaded.unwrap_or_else(|| {
            (
                greeting(&character),
                new_chat_file_name(&character.name, now_millis()),
            )
        });

        {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                return state.messages.clone();
            }
            state.messages = messages.clone();
            state.chat_file_name = Some(file_name);
            state.loading = false;
        }
        self.schedule_persistence();
        messages
    }

    pub async fn start_new_chat(&self) -> Result<Vec<Message>, ChatError> {
        let character = self.current_character().ok_or(ChatError::NoCharacter)?;
        let messages = greeting(&character);
        let file_name = new_chat_file_name(&character.name, now_millis());
        lock(&self.state).replace(character, messages.clone(), Some(file_name));
        self.invalidate_pending();
        self.schedule_persistence();
        Ok(messages)
    }

    /// Aborts the pending generation's job poll, if any.
    pub fn cancel_generation(&self) -> bool {
        let pending = lock(&self.state).pending.clone();
        match pending {
            Some(id) => self.aborts.abort(&id).is_ok(),
            None => false,
        }
    }

    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let generation_id = uuid::Uuid::new_v4().to_string();
        let (character, history, epoch) = {
            let mut state = lock(&self.state);
            let character = state.character.clone().ok_or(ChatError::NoCharacter)?;
            if state.is_busy() {
                return Err(ChatError::Busy);
            }
            let now = now_millis();
            state.messages.push(Message::new(Role::User, text, now));
            let history = state.messages.clone();
            state.messages.push(Message::thinking(now));
            state.pending = Some(generation_id.clone());
            (character, history, state.epoch)
        };
        self.schedule_persistence();

        let mut config = self.config();
        if config.api_key.trim().is_empty() {
            if let Some(key) = self.keys.resolve_key(&config.main_api).await {
                config.api_key = key;
            }
        }
        let prompt = assemble(&character, &config, &history);
        let signal = self.aborts.register(generation_id.clone());
        let result = self.generator.generate(&prompt, &config, Some(signal)).await;
        self.aborts.unregister(&generation_id);

        let outcome = {
            let mut state = lock(&self.state);
            if state.epoch != epoch || state.pending.as_deref() != Some(generation_id.as_str()) {
                log_info("chat_service", "discarding completion for a replaced transcript");
                return Ok(SendOutcome::Abandoned);
            }
            state.pending = None;
            let content = match result {
                Ok(reply) => reply,
                Err(err) if err.kind == GenerationErrorKind::Cancelled => {
                    state.messages.retain(|m| !m.is_thinking);
                    return Ok(SendOutcome::Cancelled);
                }
                Err(err) => {
                    log_error(
                        "chat_service",
                        format!("generation failed ({}): {}", err.kind.as_str(), err.message),
                    );
                    FAILURE_MESSAGE.to_string()
                }
            };
            match state.messages.iter_mut().find(|m| m.is_thinking) {
                Some(placeholder) => {
                    placeholder.content = content;
                    placeholder.is_thinking = false;
                    placeholder.timestamp = now_millis();
                    SendOutcome::Completed(placeholder.clone())
                }
                None => SendOutcome::Abandoned,
            }
        };
        self.schedule_persistence();
        Ok(outcome)
    }

    /// Debounced local snapshot (when auto-restore is on) and remote chat
    /// save (once the transcript holds more than the greeting). Failures
    /// are logged by the writers and never surface here.
    fn schedule_persistence(&self) {
        let (character, messages, file_name) = {
            let state = lock(&self.state);
            let Some(character) = state.character.clone() else {
                return;
            };
            let messages: Vec<Message> = state
                .messages
                .iter()
                .filter(|m| !m.is_thinking)
                .cloned()
                .collect();
            (character, messages, state.chat_file_name.clone())
        };

        if load_app_settings(&self.local).auto_restore_chat {
            self.snapshots.schedule(character.id.clone(), messages.clone());
        }

        let Some(file_name) = file_name else {
            return;
        };
        if messages.len() <= 1 {
            return;
        }
        let archive = self.archive.clone();
        let user_name = lock(&self.config).user_name.clone();
        self.remote_autosave.schedule(async move {
            if let Err(err) = save_remote(
                archive.as_ref(),
                &character.id,
                &file_name,
                &messages,
                &user_name,
                &character.name,
                now_millis(),
            )
            .await
            {
                log_warn("chat_service", format!("remote autosave failed: {}", err));
            }
        });
    }

    /// A resumable session, when auto-restore is on, the snapshot's character
    /// still exists and the snapshot holds more than the greeting.
    pub fn check_restore(&self, characters: &[Character]) -> Option<RestoreOffer> {
        if !load_app_settings(&self.local).auto_restore_chat {
            return None;
        }
        let snapshot = load_local_snapshot(&self.local)?;
        if snapshot.messages.len() <= 1 {
            return None;
        }
        let character = characters.iter().find(|c| c.id == snapshot.character_id)?;
        Some(RestoreOffer {
            character: character.clone(),
            age: describe_since(snapshot.last_updated, now_millis()),
            messages: snapshot.messages,
            last_updated: snapshot.last_updated,
        })
    }

    /// Resumes the snapshot under a fresh chat file, so later autosaves
    /// never overwrite an unrelated remote chat.
    pub fn accept_restore(&self, offer: RestoreOffer) -> Vec<Message> {
        let file_name = new_chat_file_name(&offer.character.name, now_millis());
        let messages = offer.messages;
        lock(&self.state).replace(offer.character, messages.clone(), Some(file_name));
        self.invalidate_pending();
        self.schedule_persistence();
        messages
    }

    pub fn decline_restore(&self) {
        self.snapshots.cancel();
        if let Err(err) = clear_local_snapshot(&self.local) {
            log_warn("chat_service", format!("clearing snapshot failed: {}", err));
        }
    }
}
