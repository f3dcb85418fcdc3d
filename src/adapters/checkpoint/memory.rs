//! In-memory checkpoint store for tests and ephemeral runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::ports::{Checkpoint, CheckpointStore};

#[derive(Default)]
pub struct MemoryCheckpointStore {
    snapshots: RwLock<HashMap<Uuid, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, session_id: Uuid, snapshot: &Checkpoint) -> EngineResult<()> {
        self.snapshots
            .write()
            .await
            .insert(session_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>> {
        Ok(self.snapshots.read().await.get(&session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::session::SessionState;

    #[tokio::test]
    async fn test_save_load_replace() {
        let store = MemoryCheckpointStore::new();
        let state = SessionState::new("brief");
        let id = state.session_id;

        assert!(store.load(id).await.unwrap().is_none());

        store.save(id, &Checkpoint::running(state.clone())).await.unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();
        assert!(!loaded.is_suspended());
        assert_eq!(loaded.state.session_id, id);

        let mut replaced = state;
        replaced.requirements_confirmed = true;
        store.save(id, &Checkpoint::running(replaced)).await.unwrap();
        assert!(store.load(id).await.unwrap().unwrap().state.requirements_confirmed);
    }
}
