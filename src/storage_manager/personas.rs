use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use super::local_store::LocalStore;
use crate::chat_manager::config::ChatConfig;
use crate::chat_manager::types::Persona;
use crate::serde_utils::non_empty_str;
use crate::utils::{log_info, now_millis};

const PERSONAS_KEY: &str = "personas";
const ACTIVE_PERSONA_KEY: &str = "active_persona";

fn new_persona_id(now: u64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("persona_{}_{}", now, suffix)
}

/// Field changes for [`PersonaLibrary::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct PersonaUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<Option<String>>,
}

/// User personas kept in local storage, plus the active-persona pointer.
#[derive(Clone)]
pub struct PersonaLibrary {
    store: LocalStore,
}

impl PersonaLibrary {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<Persona>, String> {
        Ok(self.store.get_json(PERSONAS_KEY)?.unwrap_or_default())
    }

    fn save_all(&self, personas: &[Persona]) -> Result<(), String> {
        self.store.set_json(PERSONAS_KEY, &personas)
    }

    pub fn get(&self, id: &str) -> Result<Option<Persona>, String> {
        Ok(self.list()?.into_iter().find(|p| p.id == id))
    }

    pub fn create(
        &self,
        name: &str,
        description: &str,
        avatar: Option<String>,
    ) -> Result<Persona, String> {
        let now = now_millis();
        let persona = Persona {
            id: new_persona_id(now),
            name: name.to_string(),
            description: description.to_string(),
            avatar,
            created_at: now,
            updated_at: now,
        };
        let mut personas = self.list()?;
        personas.push(persona.clone());
        self.save_all(&personas)?;
        log_info("personas", format!("created persona {}", persona.id));
        Ok(persona)
    }

    pub fn create_from_config(&self, config: &ChatConfig) -> Result<Persona, String> {
        self.create(&config.user_name, &config.user_description, None)
    }

    pub fn update(&self, id: &str, update: PersonaUpdate) -> Result<Persona, String> {
        let mut personas = self.list()?;
        let persona = personas
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| format!("persona {} not found", id))?;
        if let Some(name) = update.name {
            persona.name = name;
        }
        if let Some(description) = update.description {
            persona.description = description;
        }
        if let Some(avatar) = update.avatar {
            persona.avatar = avatar;
        }
        persona.updated_at = now_millis().max(persona.updated_at + 1);
        let updated = persona.clone();
        self.save_all(&personas)?;
        Ok(updated)
    }

    /// Returns whether a persona was removed. Deleting the active persona
    /// also clears the active pointer.
    pub fn delete(&self, id: &str) -> Result<bool, String> {
        let mut personas = self.list()?;
        let before = personas.len();
        personas.retain(|p| p.id != id);
        if personas.len() == before {
            return Ok(false);
        }
        self.save_all(&personas)?;
        if self.active_id()?.as_deref() == Some(id) {
            self.set_active_id(None)?;
        }
        Ok(true)
    }

    pub fn active_id(&self) -> Result<Option<String>, String> {
        self.store.get_migrating(ACTIVE_PERSONA_KEY)
    }

    pub fn set_active_id(&self, id: Option<&str>) -> Result<(), String> {
        match id {
            Some(id) => self.store.set_both(ACTIVE_PERSONA_KEY, id),
            None => self.store.remove_both(ACTIVE_PERSONA_KEY),
        }
    }

    pub fn active(&self) -> Result<Option<Persona>, String> {
        match self.active_id()? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    pub fn export(&self, id: &str) -> Result<String, String> {
        let persona = self
            .get(id)?
            .ok_or_else(|| format!("persona {} not found", id))?;
        serde_json::to_string_pretty(&persona).map_err(|e| e.to_string())
    }

    /// Imports an exported persona as a new entry with a fresh id.
    pub fn import(&self, json: &str) -> Result<Persona, String> {
        let data: Value = serde_json::from_str(json).map_err(|e| format!("invalid persona file: {}", e))?;
        let name = non_empty_str(&data, "name").ok_or("persona file has no name")?;
        let description = data
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or("persona file has no description")?;
        let avatar = non_empty_str(&data, "avatar").map(str::to_string);
        self.create(name, description, avatar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PersonaLibrary {
        PersonaLibrary::new(LocalStore::in_memory().unwrap())
    }

    #[test]
    fn create_update_get() {
        let lib = library();
        let p = lib.create("Ann", "A wanderer", None).unwrap();
        assert!(p.id.starts_with("persona_"));
        assert_eq!(p.id.rsplit('_').next().unwrap().len(), 7);

        let updated = lib
            .update(
                &p.id,
                PersonaUpdate {
                    description: Some("A knight".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Ann");
        assert_eq!(updated.description, "A knight");
        assert!(updated.updated_at > p.updated_at);
        assert_eq!(lib.get(&p.id).unwrap().unwrap(), updated);
        assert!(lib.update("missing", PersonaUpdate::default()).is_err());
    }

    #[test]
    fn deleting_active_persona_clears_pointer() {
        let lib = library();
        let a = lib.create("A", "", None).unwrap();
        let b = lib.create("B", "", None).unwrap();
        lib.set_active_id(Some(&a.id)).unwrap();
        assert_eq!(lib.active().unwrap().unwrap().id, a.id);

        assert!(lib.delete(&b.id).unwrap());
        assert_eq!(lib.active_id().unwrap().as_deref(), Some(a.id.as_str()));

        assert!(lib.delete(&a.id).unwrap());
        assert_eq!(lib.active_id().unwrap(), None);
        assert!(!lib.delete(&a.id).unwrap());
    }

    #[test]
    fn export_then_import_creates_new_entry() {
        let lib = library();
        let p = lib.create("Ann", "A wanderer", Some("ann.png".into())).unwrap();
        let exported = lib.export(&p.id).unwrap();
        let imported = lib.import(&exported).unwrap();
        assert_ne!(imported.id, p.id);
        assert_eq!(imported.avatar.as_deref(), Some("ann.png"));
        assert_eq!(lib.list().unwrap().len(), 2);

        assert!(lib.import(r#"{"description":"x"}"#).is_err());
        assert!(lib.import(r#"{"name":"x"}"#).is_err());
    }

    #[test]
    fn persona_from_config_uses_user_fields() {
        let lib = library();
        let config = ChatConfig {
            user_name: "Ann".into(),
            user_description: "Tall".into(),
            ..Default::default()
        };
        let p = lib.create_from_config(&config).unwrap();
        assert_eq!((p.name.as_str(), p.description.as_str()), ("Ann", "Tall"));
    }
}
