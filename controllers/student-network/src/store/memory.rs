//! In-memory store

use super::{NewStudentNetwork, Shared, StoreError, StoreState, StoreTransaction, StudentNetworkRecord, StudentNetworkStore};
use std::sync::Arc;

/// In-memory store; nothing survives the process
///
/// Counts commits and rollbacks across all transactions so tests can assert
/// on transaction behaviour.
#[derive(Debug)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            shared: Shared::new(StoreState::default(), None),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with committed records (for test setup); counters stay at zero
    pub fn with_records(records: impl IntoIterator<Item = NewStudentNetwork>) -> Result<Self, StoreError> {
        let mut state = StoreState::default();
        for record in records {
            if state.records.contains_key(&record.username) {
                return Err(StoreError::Conflict(record.username));
            }
            let id = state.take_id();
            state.records.insert(
                record.username.clone(),
                StudentNetworkRecord {
                    id,
                    username: record.username,
                    vnet_id: record.vnet_id,
                    subnet_cidr: record.subnet_cidr,
                    updated_at: chrono::Utc::now(),
                },
            );
        }
        Ok(Self {
            shared: Shared::new(state, None),
        })
    }

    /// Committed records, ordered by username
    pub async fn records(&self) -> Vec<StudentNetworkRecord> {
        self.shared.committed().await.into_values().collect()
    }

    pub fn commit_count(&self) -> u32 {
        self.shared.commit_count()
    }

    pub fn rollback_count(&self) -> u32 {
        self.shared.rollback_count()
    }
}

#[async_trait::async_trait]
impl StudentNetworkStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(self.shared.begin()))
    }

    async fn get(&self, username: &str) -> Result<Option<StudentNetworkRecord>, StoreError> {
        Ok(self.shared.committed().await.remove(username))
    }
}
