//! Record persistence behind a generic key-indexed store.
//!
//! The orchestrator never talks to a database directly. It reads and writes
//! JSON values keyed by `(RecordKind, key)` through [`RecordStore`], and the
//! [`Records`] facade adds typed access on top.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::adventure::{Adventure, AdventureStatus};
use crate::character::{CharacterRecord, Companion};
use crate::ids::{AdventureId, CharacterId, CompanionId, SessionId, ThreadId};
use crate::session::Session;
use crate::threads::StoryThread;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record {kind}/{key}: {reason}")]
    Corrupt {
        kind: RecordKind,
        key: String,
        reason: String,
    },
}

/// Collections in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Character,
    Companion,
    Session,
    Adventure,
    Thread,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Character,
        RecordKind::Companion,
        RecordKind::Session,
        RecordKind::Adventure,
        RecordKind::Thread,
    ];

    /// Directory/collection name.
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Character => "characters",
            RecordKind::Companion => "companions",
            RecordKind::Session => "sessions",
            RecordKind::Adventure => "adventures",
            RecordKind::Thread => "threads",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generic key-indexed persistence service.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, PersistError>;

    async fn put(&self, kind: RecordKind, key: &str, value: Value) -> Result<(), PersistError>;

    /// Returns whether a record was removed.
    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool, PersistError>;

    /// Every record of `kind`, ordered by key.
    async fn list(&self, kind: RecordKind) -> Result<Vec<(String, Value)>, PersistError>;
}

/// A type stored as one record.
pub trait Record: Serialize + DeserializeOwned {
    const KIND: RecordKind;

    fn key(&self) -> String;
}

impl Record for CharacterRecord {
    const KIND: RecordKind = RecordKind::Character;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Companion {
    const KIND: RecordKind = RecordKind::Companion;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Session {
    const KIND: RecordKind = RecordKind::Session;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Adventure {
    const KIND: RecordKind = RecordKind::Adventure;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for StoryThread {
    const KIND: RecordKind = RecordKind::Thread;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Typed access over any [`RecordStore`].
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn RecordStore>,
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn load<T: Record>(&self, key: &str) -> Result<Option<T>, PersistError> {
        match self.store.get(T::KIND, key).await? {
            Some(value) => decode(T::KIND, key, value).map(Some),
            None => Ok(None),
        }
    }

    pub async fn save<T: Record>(&self, record: &T) -> Result<(), PersistError> {
        let value = serde_json::to_value(record)?;
        self.store.put(T::KIND, &record.key(), value).await
    }

    pub async fn remove<T: Record>(&self, key: &str) -> Result<bool, PersistError> {
        self.store.delete(T::KIND, key).await
    }

    pub async fn all<T: Record>(&self) -> Result<Vec<T>, PersistError> {
        self.store
            .list(T::KIND)
            .await?
            .into_iter()
            .map(|(key, value)| decode(T::KIND, &key, value))
            .collect()
    }

    pub async fn character(&self, id: CharacterId) -> Result<Option<CharacterRecord>, PersistError> {
        self.load(&id.to_string()).await
    }

    pub async fn companion(&self, id: CompanionId) -> Result<Option<Companion>, PersistError> {
        self.load(&id.to_string()).await
    }

    pub async fn session(&self, id: SessionId) -> Result<Option<Session>, PersistError> {
        self.load(&id.to_string()).await
    }

    pub async fn adventure(&self, id: AdventureId) -> Result<Option<Adventure>, PersistError> {
        self.load(&id.to_string()).await
    }

    pub async fn thread(&self, id: ThreadId) -> Result<Option<StoryThread>, PersistError> {
        self.load(&id.to_string()).await
    }

    pub async fn companions_of(&self, owner: CharacterId) -> Result<Vec<Companion>, PersistError> {
        let mut companions: Vec<Companion> = self
            .all::<Companion>()
            .await?
            .into_iter()
            .filter(|c| c.owner == owner)
            .collect();
        companions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(companions)
    }

    pub async fn sessions_of(&self, owner: CharacterId) -> Result<Vec<Session>, PersistError> {
        let mut sessions: Vec<Session> = self
            .all::<Session>()
            .await?
            .into_iter()
            .filter(|s| s.character_id == owner)
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    pub async fn adventures_of(&self, owner: CharacterId) -> Result<Vec<Adventure>, PersistError> {
        let mut adventures: Vec<Adventure> = self
            .all::<Adventure>()
            .await?
            .into_iter()
            .filter(|a| a.character_id == owner)
            .collect();
        adventures.sort_by_key(|a| a.started_at);
        Ok(adventures)
    }

    /// The session in setup, active or paused that `character` plays in,
    /// as the primary or the second character.
    pub async fn open_session_for(&self, character: CharacterId) -> Result<Option<Session>, PersistError> {
        Ok(self
            .all::<Session>()
            .await?
            .into_iter()
            .find(|s| {
                s.status.is_open()
                    && (s.character_id == character || s.config.second_character == Some(character))
            }))
    }

    pub async fn open_adventure_for(
        &self,
        owner: CharacterId,
    ) -> Result<Option<Adventure>, PersistError> {
        Ok(self
            .adventures_of(owner)
            .await?
            .into_iter()
            .find(|a| a.status == AdventureStatus::InProgress))
    }

    pub async fn threads_of(&self, owner: CharacterId) -> Result<Vec<StoryThread>, PersistError> {
        Ok(self
            .all::<StoryThread>()
            .await?
            .into_iter()
            .filter(|t| t.character_id == owner)
            .collect())
    }
}

fn decode<T: DeserializeOwned>(kind: RecordKind, key: &str, value: Value) -> Result<T, PersistError> {
    serde_json::from_value(value).map_err(|e| PersistError::Corrupt {
        kind,
        key: key.to_string(),
        reason: e.to_string(),
    })
}
