//! Provider API keys: session cache over local storage, with environment
//! defaults and a debounced mirror into the backend's secret store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::backend::SecretSink;
use crate::coalescer::{Coalescer, KEY_WRITE_DEBOUNCE};
use crate::providers::{all_providers, provider_spec};
use crate::storage_manager::LocalStore;
use crate::utils::{log_info, log_warn};

fn key_name(provider_id: &str) -> String {
    format!("api_key_{}", provider_id)
}

/// Locks `mutex`, logging and recovering when a previous holder panicked.
fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log_warn("secrets", format!("{} lock poisoned, recovering", what));
        poisoned.into_inner()
    })
}

/// Deployment-provided keys, one per provider.
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults(HashMap<String, String>);

impl EnvDefaults {
    pub fn from_process_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let keys = all_providers()
            .iter()
            .filter_map(|spec| {
                let value = lookup(spec.env_var?)?;
                let value = value.trim();
                (!value.is_empty()).then(|| (spec.id.to_string(), value.to_string()))
            })
            .collect();
        Self(keys)
    }

    pub fn get(&self, provider_id: &str) -> Option<&str> {
        self.0.get(provider_id).map(String::as_str)
    }
}

pub struct KeyStore {
    local: LocalStore,
    remote: Option<Arc<dyn SecretSink>>,
    env: EnvDefaults,
    cache: Mutex<HashMap<String, String>>,
    mirrored: Mutex<HashSet<String>>,
    remote_writer: Coalescer,
}

impl KeyStore {
    pub fn new(local: LocalStore, remote: Option<Arc<dyn SecretSink>>, env: EnvDefaults) -> Self {
        Self {
            local,
            remote,
            env,
            cache: Mutex::new(HashMap::new()),
            mirrored: Mutex::new(HashSet::new()),
            remote_writer: Coalescer::new("key_write", KEY_WRITE_DEBOUNCE),
        }
    }

    fn cached(&self, provider_id: &str) -> Option<String> {
        lock_or_recover(&self.cache, "key cache").get(provider_id).cloned()
    }

    fn remember(&self, provider_id: &str, key: &str) {
        lock_or_recover(&self.cache, "key cache").insert(provider_id.to_string(), key.to_string());
    }

    fn forget(&self, provider_id: &str) {
        lock_or_recover(&self.cache, "key cache").remove(provider_id);
    }

    /// Claims the one-time env mirror for a provider.
    fn claim_mirror(&self, provider_id: &str) -> bool {
        lock_or_recover(&self.mirrored, "mirror set").insert(provider_id.to_string())
    }

    /// Session cache, then local storage (legacy keys are promoted), then the
    /// environment default. An env default is mirrored to the backend secret
    /// store once per provider.
    pub async fn resolve_key(&self, provider_id: &str) -> Option<String> {
        if let Some(key) = self.cached(provider_id) {
            return Some(key);
        }

        match self.local.get_migrating(&key_name(provider_id)) {
            Ok(Some(key)) if !key.is_empty() => {
                self.remember(provider_id, &key);
                return Some(key);
            }
            Ok(_) => {}
            Err(err) => log_warn("secrets", format!("reading key for {} failed: {}", provider_id, err)),
        }

        let key = self.env.get(provider_id)?.to_string();
        let secret = provider_spec(provider_id).and_then(|spec| spec.backend_secret);
        if let (Some(secret), Some(remote)) = (secret, self.remote.as_ref()) {
            if self.claim_mirror(provider_id) {
                let label = format!("{} API Key", provider_id);
                match remote.write_secret(secret, &key, &label).await {
                    Ok(()) => log_info("secrets", format!("mirrored env key for {}", provider_id)),
                    Err(err) => log_warn("secrets", format!("mirroring {} failed: {}", provider_id, err)),
                }
            }
        }
        self.remember(provider_id, &key);
        Some(key)
    }

    /// Stores a key under both prefixes; an empty key clears them. Returns
    /// the pending remote push when the provider keeps a server-side secret.
    pub fn set_key(&self, provider_id: &str, key: &str) -> Result<Option<JoinHandle<bool>>, String> {
        let key = key.trim();
        let name = key_name(provider_id);
        if key.is_empty() {
            self.local.remove_both(&name)?;
            self.forget(provider_id);
            log_info("secrets", format!("cleared key for {}", provider_id));
            return Ok(None);
        }

        self.local.set_both(&name, key)?;
        self.remember(provider_id, key);

        let secret = provider_spec(provider_id).and_then(|spec| spec.backend_secret);
        let (Some(secret), Some(remote)) = (secret, self.remote.clone()) else {
            return Ok(None);
        };
        let value = key.to_string();
        let label = format!("{} API Key", provider_id);
        Ok(Some(self.remote_writer.schedule(async move {
            if let Err(err) = remote.write_secret(secret, &value, &label).await {
                log_warn("secrets", format!("secret push for {} failed: {}", secret, err));
            }
        })))
    }

    pub fn reset(&self) {
        lock_or_recover(&self.cache, "key cache").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl SecretSink for RecordingSink {
        async fn write_secret(&self, key: &str, value: &str, label: &str) -> Result<(), AppError> {
            self.writes
                .lock()
                .unwrap()
                .push((key.into(), value.into(), label.into()));
            Ok(())
        }
    }

    fn store_with(env: &[(&str, &str)]) -> (KeyStore, Arc<RecordingSink>, LocalStore) {
        let local = LocalStore::in_memory().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let store = KeyStore::new(
            local.clone(),
            Some(sink.clone()),
            EnvDefaults::from_lookup(|var| env.get(var).cloned()),
        );
        (store, sink, local)
    }

    #[tokio::test]
    async fn legacy_key_is_promoted() {
        let (store, _, local) = store_with(&[]);
        local.set("etheria_api_key_openai", "sk-old").unwrap();
        assert_eq!(store.resolve_key("openai").await.as_deref(), Some("sk-old"));
        assert_eq!(
            local.get("romanbath_api_key_openai").unwrap().as_deref(),
            Some("sk-old")
        );
    }

    #[tokio::test]
    async fn env_default_is_mirrored_exactly_once() {
        let (store, sink, _) = store_with(&[("OPENROUTER_API_KEY", "or-env")]);
        assert_eq!(store.resolve_key("openrouter").await.as_deref(), Some("or-env"));
        assert_eq!(store.resolve_key("openrouter").await.as_deref(), Some("or-env"));
        store.reset();
        assert_eq!(store.resolve_key("openrouter").await.as_deref(), Some("or-env"));

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "api_key_openrouter");
        assert_eq!(writes[0].2, "openrouter API Key");
    }

    #[tokio::test]
    async fn missing_key_resolves_to_none() {
        let (store, sink, _) = store_with(&[]);
        assert_eq!(store.resolve_key("openai").await, None);
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_key_clears_both_prefixes() {
        let (store, _, local) = store_with(&[]);
        store.set_key("kobold", "abc").unwrap();
        assert_eq!(local.get("etheria_api_key_kobold").unwrap().as_deref(), Some("abc"));
        assert!(store.set_key("kobold", "  ").unwrap().is_none());
        assert_eq!(local.get("romanbath_api_key_kobold").unwrap(), None);
        assert_eq!(local.get("etheria_api_key_kobold").unwrap(), None);
        assert_eq!(store.resolve_key("kobold").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_key_edits_push_once() {
        let (store, sink, _) = store_with(&[]);
        let first = store.set_key("openai", "sk-1").unwrap().unwrap();
        let second = store.set_key("openai", "sk-12").unwrap().unwrap();
        let third = store.set_key("openai", "sk-123").unwrap().unwrap();
        assert!(!first.await.unwrap());
        assert!(!second.await.unwrap());
        assert!(third.await.unwrap());

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "sk-123");
        assert_eq!(store.cached("openai").as_deref(), Some("sk-123"));
    }

    #[tokio::test]
    async fn poisoned_locks_still_cache_and_mirror_once() {
        let (store, sink, _) = store_with(&[("OPENAI_API_KEY", "sk-env")]);
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _cache = store.cache.lock().unwrap();
            let _mirrored = store.mirrored.lock().unwrap();
            panic!("poison both locks");
        }));
        assert!(store.cache.is_poisoned());
        assert!(store.mirrored.is_poisoned());

        assert_eq!(store.resolve_key("openai").await.as_deref(), Some("sk-env"));
        assert_eq!(store.cached("openai").as_deref(), Some("sk-env"));
        store.reset();
        assert_eq!(store.resolve_key("openai").await.as_deref(), Some("sk-env"));
        assert_eq!(sink.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_only_provider_has_no_remote_push() {
        let (store, _, _) = store_with(&[]);
        assert!(store.set_key("llamacpp", "k").unwrap().is_none());
    }
}
