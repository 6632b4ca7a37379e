// Session Repository
// Feature: Browser Chat (001-chat-session)
//
// Persists the whitelisted part of a chat session as JSON under one key of the
// settings table. Engine, progress, usage and cancellation state never reach
// storage.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::models::{GenerationParameters, Message};
use crate::utils::database::Database;
use crate::utils::lock_unpoisoned;

/// Envelope version written alongside the state
const SNAPSHOT_VERSION: u32 = 0;

/// Persisted projection of the chat session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub input: String,
    /// Model, system prompt and sampling options, flattened like the stored state
    #[serde(flatten)]
    pub parameters: GenerationParameters,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    state: serde_json::Value,
    #[serde(default)]
    version: u32,
}

/// Encode a snapshot into its stored JSON form
fn encode(snapshot: &SessionSnapshot) -> Result<String, String> {
    let state = serde_json::to_value(snapshot)
        .map_err(|e| format!("Failed to serialize session: {}", e))?;
    serde_json::to_string(&StoredSession {
        state,
        version: SNAPSHOT_VERSION,
    })
    .map_err(|e| format!("Failed to serialize session: {}", e))
}

/// Decode a stored value; anything unreadable is treated as absent
fn decode(key: &str, raw: &str) -> Option<SessionSnapshot> {
    let stored: StoredSession = match serde_json::from_str(raw) {
        Ok(stored) => stored,
        Err(e) => {
            log::warn!("Ignoring unreadable session '{}': {}", key, e);
            return None;
        }
    };

    if stored.version != SNAPSHOT_VERSION {
        log::warn!(
            "Ignoring session '{}' with unknown version {}",
            key,
            stored.version
        );
        return None;
    }

    match serde_json::from_value(stored.state) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::warn!("Ignoring malformed session '{}': {}", key, e);
            None
        }
    }
}

/// Durable storage for one chat session
pub trait SessionStorage: Send + Sync {
    /// Read the stored snapshot, `None` when absent or unreadable
    fn load(&self) -> Result<Option<SessionSnapshot>, String>;

    /// Overwrite the stored snapshot
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), String>;

    /// Remove the stored snapshot
    fn clear(&self) -> Result<(), String>;
}

/// SQLite-backed session storage
pub struct SessionRepository {
    db: Database,
    key: String,
}

impl SessionRepository {
    /// Create a repository writing under `key` (e.g. "chat")
    pub fn new(db: Database, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn read_raw(&self) -> Result<Option<String>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![self.key],
                |row| row.get::<_, String>(0),
            );

            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to read session: {}", e)),
            }
        })
    }
}

impl SessionStorage for SessionRepository {
    fn load(&self) -> Result<Option<SessionSnapshot>, String> {
        Ok(self
            .read_raw()?
            .and_then(|raw| decode(&self.key, &raw)))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), String> {
        let value = encode(snapshot)?;

        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO settings (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![self.key, value],
            )
            .map_err(|e| format!("Failed to save session: {}", e))?;
            Ok(())
        })
    }

    fn clear(&self) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![self.key])
                .map_err(|e| format!("Failed to delete session: {}", e))?;
            Ok(())
        })
    }
}

/// In-process storage for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySessionStorage {
    values: Mutex<HashMap<String, String>>,
}

const MEMORY_KEY: &str = "chat";

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with a raw stored value
    pub fn with_raw(raw: impl Into<String>) -> Self {
        let storage = Self::default();
        lock_unpoisoned(&storage.values).insert(MEMORY_KEY.to_string(), raw.into());
        storage
    }

    /// Raw stored value, for inspection
    pub fn raw(&self) -> Option<String> {
        lock_unpoisoned(&self.values).get(MEMORY_KEY).cloned()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>, String> {
        Ok(self.raw().and_then(|raw| decode(MEMORY_KEY, &raw)))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), String> {
        let value = encode(snapshot)?;
        lock_unpoisoned(&self.values).insert(MEMORY_KEY.to_string(), value);
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        lock_unpoisoned(&self.values).remove(MEMORY_KEY);
        Ok(())
    }
}
