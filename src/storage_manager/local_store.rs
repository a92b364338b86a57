use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::utils::{log_info, now_millis};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Prefix for keys written by the current client.
pub const PRIMARY_PREFIX: &str = "romanbath_";
/// Prefix used by earlier releases. Read for migration, still written for rollback.
pub const LEGACY_PREFIX: &str = "etheria_";

pub fn primary_key(name: &str) -> String {
    format!("{}{}", PRIMARY_PREFIX, name)
}

pub fn legacy_key(name: &str) -> String {
    format!("{}{}", LEGACY_PREFIX, name)
}

/// Durable string key-value store standing in for browser local storage.
#[derive(Clone)]
pub struct LocalStore {
    pool: DbPool,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, String> {
        log_info("local_store", format!("opening {:?}", path));
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch(
                r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA temp_store=MEMORY;
                    "#,
            )
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| format!("Failed to create pool: {}", e))?;
        Self::with_pool(pool)
    }

    /// Single-connection in-memory store. Every pooled connection to
    /// `:memory:` would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self, String> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| format!("Failed to create pool: {}", e))?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: DbPool) -> Result<Self, String> {
        let store = Self { pool };
        store.conn()?.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(store)
    }

    fn conn(&self) -> Result<DbConnection, String> {
        self.pool
            .get()
            .map_err(|e| format!("Failed to get connection from pool: {}", e))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, String> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_millis() as i64],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Reads `name` under the primary prefix, falling back to the legacy
    /// prefix. A legacy-only value is promoted into the primary key.
    pub fn get_migrating(&self, name: &str) -> Result<Option<String>, String> {
        let primary = primary_key(name);
        if let Some(value) = self.get(&primary)? {
            return Ok(Some(value));
        }
        match self.get(&legacy_key(name))? {
            Some(value) => {
                log_info("local_store", format!("promoting legacy key {}", name));
                self.set(&primary, &value)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Writes both prefixes in one transaction.
    pub fn set_both(&self, name: &str, value: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        let now = now_millis() as i64;
        for key in [primary_key(name), legacy_key(name)] {
            tx.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    pub fn remove_both(&self, name: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        for key in [primary_key(name), legacy_key(name)] {
            tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
                .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    pub fn get_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>, String> {
        match self.get_migrating(name)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| format!("Failed to parse {}: {}", name, e)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<(), String> {
        let raw = serde_json::to_string(value).map_err(|e| e.to_string())?;
        self.set_both(name, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = LocalStore::in_memory().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn legacy_value_is_promoted_on_read() {
        let store = LocalStore::in_memory().unwrap();
        store.set("etheria_chat_state", "{}").unwrap();
        assert_eq!(store.get_migrating("chat_state").unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get("romanbath_chat_state").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn primary_wins_over_legacy() {
        let store = LocalStore::in_memory().unwrap();
        store.set("etheria_x", "old").unwrap();
        store.set("romanbath_x", "new").unwrap();
        assert_eq!(store.get_migrating("x").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn writes_and_removals_touch_both_prefixes() {
        let store = LocalStore::in_memory().unwrap();
        store.set_both("k", "v").unwrap();
        assert_eq!(store.get("romanbath_k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("etheria_k").unwrap().as_deref(), Some("v"));
        store.remove_both("k").unwrap();
        assert_eq!(store.get("romanbath_k").unwrap(), None);
        assert_eq!(store.get("etheria_k").unwrap(), None);
    }

    #[test]
    fn failed_legacy_write_leaves_prefixes_in_step() {
        let store = LocalStore::in_memory().unwrap();
        store.set_both("kept", "v").unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(
                r#"
                    CREATE TRIGGER reject_legacy_insert BEFORE INSERT ON kv_store
                    WHEN NEW.key LIKE 'etheria_%'
                    BEGIN SELECT RAISE(ABORT, 'legacy write rejected'); END;
                    CREATE TRIGGER reject_legacy_delete BEFORE DELETE ON kv_store
                    WHEN OLD.key LIKE 'etheria_%'
                    BEGIN SELECT RAISE(ABORT, 'legacy delete rejected'); END;
                    "#,
            )
            .unwrap();

        assert!(store.set_both("fresh", "v").is_err());
        assert_eq!(store.get("romanbath_fresh").unwrap(), None);

        assert!(store.remove_both("kept").is_err());
        assert_eq!(store.get("romanbath_kept").unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("etheria_kept").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        LocalStore::open(&path).unwrap().set_both("k", "v").unwrap();
        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.get_migrating("k").unwrap().as_deref(), Some("v"));
    }
}
