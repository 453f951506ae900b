//! Persistence of user → network records.
//!
//! Every reconciliation opens its own [`StoreTransaction`] with
//! [`StudentNetworkStore::begin`]. `add`, `update` and `delete` stage changes
//! that only that transaction sees; `commit` applies them to the shared
//! committed state in one step and `rollback` discards them. Surrogate ids are
//! handed out by `add` (the equivalent of a flush) from a store-wide counter
//! and are never reused, even when the transaction that took them is rolled
//! back or the store is reopened.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Persisted network of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentNetworkRecord {
    /// Auto-incrementing surrogate key; seeds the vnet id
    pub id: u64,
    pub username: String,
    pub vnet_id: String,
    pub subnet_cidr: String,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a record before it has an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudentNetwork {
    pub username: String,
    pub vnet_id: String,
    pub subnet_cidr: String,
}

/// Errors that can occur in a store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint on username violated
    #[error("Student network for {0} already exists")]
    Conflict(String),

    /// Update or delete of a missing record
    #[error("Student network not found: {0}")]
    NotFound(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable mapping of users to their networks
#[async_trait::async_trait]
pub trait StudentNetworkStore: Send + Sync {
    /// Open a transaction whose changes stay private until it commits
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Committed record of a user
    async fn get(&self, username: &str) -> Result<Option<StudentNetworkRecord>, StoreError>;
}

/// One unit of work against a store
///
/// After `commit` or `rollback` the handle starts a fresh transaction.
#[async_trait::async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Record of a user, including this transaction's staged changes
    async fn get(&self, username: &str) -> Result<Option<StudentNetworkRecord>, StoreError>;

    /// Subnet CIDRs of every record, including this transaction's staged changes
    async fn assigned_subnets(&self) -> Result<Vec<String>, StoreError>;

    /// Stage a new record and flush it, returning its surrogate id
    async fn add(&mut self, record: NewStudentNetwork) -> Result<u64, StoreError>;

    /// Stage new values for an existing record, matched by username
    async fn update(&mut self, record: &StudentNetworkRecord) -> Result<(), StoreError>;

    /// Stage removal of a user's record
    async fn delete(&mut self, username: &str) -> Result<(), StoreError>;

    /// Apply staged changes to the committed state
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard staged changes
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Committed records and the id high-water mark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub(crate) next_id: u64,
    pub(crate) records: BTreeMap<String, StudentNetworkRecord>,
}

impl StoreState {
    fn take_id(&mut self) -> u64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Committed state with `changes` applied; fails without side effects
    fn with_changes(&self, changes: &[Change]) -> Result<StoreState, StoreError> {
        let mut next = self.clone();
        for change in changes {
            match change {
                Change::Put(record) => {
                    if let Some(existing) = next.records.get(&record.username) {
                        if existing.id != record.id {
                            return Err(StoreError::Conflict(record.username.clone()));
                        }
                    }
                    next.records.insert(record.username.clone(), record.clone());
                }
                Change::Delete(username) => {
                    next.records
                        .remove(username)
                        .ok_or_else(|| StoreError::NotFound(username.clone()))?;
                }
            }
        }
        Ok(next)
    }
}

/// A staged change
#[derive(Debug, Clone)]
enum Change {
    Put(StudentNetworkRecord),
    Delete(String),
}

/// State shared by a store and all of its transactions
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<StoreState>,
    /// Written on every id handed out and every commit when set
    path: Option<PathBuf>,
    commits: AtomicU32,
    rollbacks: AtomicU32,
}

impl Shared {
    pub(crate) fn new(state: StoreState, path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            path,
            commits: AtomicU32::new(0),
            rollbacks: AtomicU32::new(0),
        })
    }

    pub(crate) fn begin(self: &Arc<Self>) -> Transaction {
        Transaction {
            shared: Arc::clone(self),
            changes: Vec::new(),
        }
    }

    pub(crate) async fn committed(&self) -> BTreeMap<String, StudentNetworkRecord> {
        self.state.lock().await.records.clone()
    }

    pub(crate) fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn rollback_count(&self) -> u32 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            file::write_atomically(path, state).await?;
        }
        Ok(())
    }
}

/// Transaction over [`Shared`] state, used by both store implementations
#[derive(Debug)]
pub(crate) struct Transaction {
    shared: Arc<Shared>,
    changes: Vec<Change>,
}

impl Transaction {
    /// Committed records overlaid with this transaction's changes
    async fn view(&self) -> BTreeMap<String, StudentNetworkRecord> {
        let mut records = self.shared.committed().await;
        for change in &self.changes {
            match change {
                Change::Put(record) => {
                    records.insert(record.username.clone(), record.clone());
                }
                Change::Delete(username) => {
                    records.remove(username);
                }
            }
        }
        records
    }
}

#[async_trait::async_trait]
impl StoreTransaction for Transaction {
    async fn get(&self, username: &str) -> Result<Option<StudentNetworkRecord>, StoreError> {
        Ok(self.view().await.remove(username))
    }

    async fn assigned_subnets(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.view().await.into_values().map(|r| r.subnet_cidr).collect())
    }

    async fn add(&mut self, record: NewStudentNetwork) -> Result<u64, StoreError> {
        if self.view().await.contains_key(&record.username) {
            return Err(StoreError::Conflict(record.username));
        }

        let id = {
            let mut state = self.shared.state.lock().await;
            let id = state.take_id();
            self.shared.persist(&state).await?;
            id
        };
        debug!("Staged network record {} for {}", id, record.username);

        self.changes.push(Change::Put(StudentNetworkRecord {
            id,
            username: record.username,
            vnet_id: record.vnet_id,
            subnet_cidr: record.subnet_cidr,
            updated_at: Utc::now(),
        }));
        Ok(id)
    }

    async fn update(&mut self, record: &StudentNetworkRecord) -> Result<(), StoreError> {
        let mut existing = self
            .view()
            .await
            .remove(&record.username)
            .ok_or_else(|| StoreError::NotFound(record.username.clone()))?;
        existing.vnet_id = record.vnet_id.clone();
        existing.subnet_cidr = record.subnet_cidr.clone();
        existing.updated_at = Utc::now();
        self.changes.push(Change::Put(existing));
        Ok(())
    }

    async fn delete(&mut self, username: &str) -> Result<(), StoreError> {
        if !self.view().await.contains_key(username) {
            return Err(StoreError::NotFound(username.to_string()));
        }
        self.changes.push(Change::Delete(username.to_string()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if !self.changes.is_empty() {
            let mut state = self.shared.state.lock().await;
            // a failed write leaves both the committed state and the staged changes intact
            let next = state.with_changes(&self.changes)?;
            self.shared.persist(&next).await?;
            *state = next;
            self.changes.clear();
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.changes.clear();
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
