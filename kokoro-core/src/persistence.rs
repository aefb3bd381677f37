//! Saving and restoring the app store through a key-value storage backend.
//!
//! Each part of the store lives under its own key. Loading never fails: a
//! missing or unreadable blob falls back to that part's defaults and records a
//! warning. The first write failure switches persistence off for the rest of
//! the process so the app keeps running in memory.

use chrono::{DateTime, Utc};
use kokoro_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::character::{CharacterId, CharacterRoster};
use crate::conversation::ConversationStore;
use crate::preferences::{Preferences, UserProfile};
use crate::store::AppStore;
use crate::storage::KeyValueStorage;

pub const BACKUP_PREFIX: &str = "backup/";

/// Snapshot format version written into backups.
const SNAPSHOT_VERSION: u32 = 1;

/// Persisted parts of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Profile,
    Preferences,
    Characters,
    Conversations,
}

impl StateKey {
    pub const ALL: [StateKey; 4] = [
        Self::Profile,
        Self::Preferences,
        Self::Characters,
        Self::Conversations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Preferences => "preferences",
            Self::Characters => "characters",
            Self::Conversations => "conversations",
        }
    }
}

/// Profile blob: the user profile plus the active character selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileRecord {
    #[serde(flatten)]
    profile: UserProfile,
    #[serde(default)]
    active_character: Option<CharacterId>,
}

/// Full store snapshot written under a backup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub store: AppStore,
}

/// Encoded writes for a set of keys. `None` removes the key.
///
/// `seq` orders encodings; a write older than what a key already holds is
/// skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrites {
    seq: u64,
    writes: Vec<(StateKey, Option<String>)>,
}

impl PendingWrites {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.writes.iter().map(|(k, _)| *k)
    }
}

/// Result of loading a store at startup.
#[derive(Debug)]
pub struct LoadReport {
    pub store: AppStore,
    pub warnings: Vec<String>,
}

pub struct Persistence {
    storage: Arc<dyn KeyValueStorage>,
    backup_limit: usize,
    degraded: AtomicBool,
    next_seq: AtomicU64,
    written: Mutex<HashMap<StateKey, u64>>,
}

impl Persistence {
    pub fn new(storage: Arc<dyn KeyValueStorage>, backup_limit: usize) -> Self {
        Self {
            storage,
            backup_limit,
            degraded: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            written: Mutex::new(HashMap::new()),
        }
    }

    /// Whether writes have been switched off after a storage failure.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Load
    // ========================================================================

    pub async fn load(&self) -> LoadReport {
        let mut warnings = Vec::new();

        let record: Option<ProfileRecord> = self.read_key(StateKey::Profile, &mut warnings).await;
        let preferences: Option<Preferences> =
            self.read_key(StateKey::Preferences, &mut warnings).await;
        let characters: Option<CharacterRoster> =
            self.read_key(StateKey::Characters, &mut warnings).await;
        let conversations: Option<ConversationStore> =
            self.read_key(StateKey::Conversations, &mut warnings).await;

        let (profile, active_character) = record
            .map(|r| (r.profile, r.active_character))
            .unwrap_or_default();

        let (conversations, repairs) = conversations.unwrap_or_default().normalized();
        for repair in repairs {
            warn!(key = StateKey::Conversations.as_str(), repair = %repair, "Repaired stored state");
            warnings.push(format!("{}: {repair}", StateKey::Conversations.as_str()));
        }

        let store = AppStore {
            conversations,
            characters: characters.unwrap_or_default().normalized(),
            preferences: preferences.unwrap_or_default().normalized(),
            profile,
            active_character,
        };

        info!(
            backend = self.storage.name(),
            conversations = store.conversations.len(),
            warnings = warnings.len(),
            "State loaded"
        );
        LoadReport { store, warnings }
    }

    async fn read_key<T: DeserializeOwned>(
        &self,
        key: StateKey,
        warnings: &mut Vec<String>,
    ) -> Option<T> {
        let raw = match self.storage.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                let message = format!("could not read '{}': {e}; using defaults", key.as_str());
                warn!(key = key.as_str(), error = %e, "Storage read failed");
                warnings.push(message);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let message = format!("'{}' is corrupted ({e}); using defaults", key.as_str());
                warn!(key = key.as_str(), error = %e, "Corrupted state blob");
                warnings.push(message);
                None
            }
        }
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Serialize the given parts of `store`. Call under the store lock; the
    /// returned writes are applied later without it.
    pub fn encode(&self, store: &AppStore, keys: &[StateKey]) -> Result<PendingWrites> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut writes: Vec<(StateKey, Option<String>)> = Vec::with_capacity(keys.len());
        for &key in keys {
            if writes.iter().any(|(k, _)| *k == key) {
                continue;
            }
            let value = match key {
                StateKey::Profile => Some(serde_json::to_string(&ProfileRecord {
                    profile: store.profile.clone(),
                    active_character: store.active_character,
                })?),
                StateKey::Preferences => Some(serde_json::to_string(&store.preferences)?),
                StateKey::Characters => Some(serde_json::to_string(&store.characters)?),
                StateKey::Conversations if store.preferences.privacy.save_history => {
                    Some(serde_json::to_string(&store.conversations)?)
                }
                StateKey::Conversations => None,
            };
            writes.push((key, value));
        }
        Ok(PendingWrites { seq, writes })
    }

    /// Apply encoded writes. After the first failure, later calls are no-ops.
    pub async fn write(&self, pending: PendingWrites) -> Result<()> {
        if self.is_degraded() || pending.is_empty() {
            return Ok(());
        }
        let mut written = self.written.lock().await;
        for (key, value) in pending.writes {
            if written.get(&key).is_some_and(|&seq| seq > pending.seq) {
                debug!(key = key.as_str(), "Skipping stale write");
                continue;
            }
            let outcome = match &value {
                Some(v) => self.storage.set(key.as_str(), v).await,
                None => self.storage.remove(key.as_str()).await.map(|_| ()),
            };
            if let Err(e) = outcome {
                self.degraded.store(true, Ordering::Relaxed);
                warn!(
                    key = key.as_str(),
                    error = %e,
                    "Storage write failed; continuing in memory only"
                );
                return Err(Error::Storage(format!("writing '{}': {e}", key.as_str())));
            }
            written.insert(key, pending.seq);
            debug!(key = key.as_str(), removed = value.is_none(), "State persisted");
        }
        Ok(())
    }

    pub async fn save(&self, store: &AppStore, keys: &[StateKey]) -> Result<()> {
        let pending = self.encode(store, keys)?;
        self.write(pending).await
    }

    // ========================================================================
    // Backups
    // ========================================================================

    /// Write a full snapshot under a new backup key and prune old backups.
    pub async fn create_backup(&self, store: &AppStore) -> Result<String> {
        let now = Utc::now();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            created_at: now,
            store: store.clone(),
        };
        let key = format!(
            "{BACKUP_PREFIX}{:013}-{}",
            now.timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let blob = serde_json::to_string(&snapshot)?;
        self.storage
            .set(&key, &blob)
            .await
            .map_err(|e| Error::Storage(format!("writing backup: {e}")))?;
        info!(key = %key, "Backup created");

        self.prune_backups().await;
        Ok(key)
    }

    /// Backup keys, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<String>> {
        let mut keys = self
            .storage
            .keys(BACKUP_PREFIX)
            .await
            .map_err(|e| Error::Storage(format!("listing backups: {e}")))?;
        keys.sort();
        Ok(keys)
    }

    /// Decode a backup into a store.
    pub async fn load_backup(&self, key: &str) -> Result<AppStore> {
        if !key.starts_with(BACKUP_PREFIX) {
            return Err(Error::Validation(format!("'{key}' is not a backup key")));
        }
        let raw = self
            .storage
            .get(key)
            .await
            .map_err(|e| Error::Storage(format!("reading backup: {e}")))?
            .ok_or_else(|| Error::NotFound(format!("backup '{key}'")))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("backup '{key}' is corrupted: {e}")))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::Storage(format!(
                "backup '{key}' has unsupported version {}",
                snapshot.version
            )));
        }

        let mut store = snapshot.store;
        let (conversations, repairs) = std::mem::take(&mut store.conversations).normalized();
        for repair in repairs {
            warn!(key, repair = %repair, "Repaired backup state");
        }
        store.conversations = conversations;
        store.characters = store.characters.normalized();
        store.preferences = store.preferences.normalized();
        Ok(store)
    }

    async fn prune_backups(&self) {
        if self.backup_limit == 0 {
            return;
        }
        let keys = match self.list_backups().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list backups for pruning");
                return;
            }
        };
        let excess = keys.len().saturating_sub(self.backup_limit);
        for key in &keys[..excess] {
            match self.storage.remove(key).await {
                Ok(_) => debug!(key = %key, "Pruned backup"),
                Err(e) => warn!(key = %key, error = %e, "Could not prune backup"),
            }
        }
    }
}
