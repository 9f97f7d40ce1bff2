//! Durable per-actor state: the stored plan record and the tenant label.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::plan::StoredPlanRecord;

/// Everything one scheduling actor persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    /// Tenant label last supplied by a caller.
    pub tenant: Option<String>,
    /// Current plan record; absent until the first successful apply.
    pub record: Option<StoredPlanRecord>,
}

/// Storage keyed by actor identity.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Loads the state of `actor_id`; a never-saved actor yields the default state.
    async fn load(&self, actor_id: &str) -> Result<ActorState, StoreError>;

    /// Replaces the state of `actor_id`.
    async fn save(&self, actor_id: &str, state: &ActorState) -> Result<(), StoreError>;

    /// Identities of every actor with saved state, sorted.
    async fn actor_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process plan store.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    states: Mutex<HashMap<String, ActorState>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn load(&self, actor_id: &str) -> Result<ActorState, StoreError> {
        Ok(self
            .states
            .lock()
            .get(actor_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, actor_id: &str, state: &ActorState) -> Result<(), StoreError> {
        self.states
            .lock()
            .insert(actor_id.to_string(), state.clone());
        Ok(())
    }

    async fn actor_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.states.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed JSON file per actor under a directory.
#[derive(Debug, Clone)]
pub struct JsonPlanStore {
    dir: PathBuf,
}

impl JsonPlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the state of `actor_id`. Characters outside
    /// `[A-Za-z0-9_-]` are hex-escaped so distinct ids never share a file.
    pub fn path_for(&self, actor_id: &str) -> PathBuf {
        let mut name = String::with_capacity(actor_id.len());
        for b in actor_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("%{b:02x}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

/// Reverses the escaping of [`JsonPlanStore::path_for`]; `None` for names it
/// never produces.
fn actor_id_from_stem(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut rest = stem.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        if b == b'%' {
            let hex = tail.get(..2)?;
            let hex = std::str::from_utf8(hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(b);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

#[async_trait]
impl PlanStore for JsonPlanStore {
    async fn load(&self, actor_id: &str) -> Result<ActorState, StoreError> {
        match tokio::fs::read(self.path_for(actor_id)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ActorState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, actor_id: &str, state: &ActorState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(actor_id);
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_vec_pretty(state)?;

        // Atomic write
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn actor_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(actor_id_from_stem)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
