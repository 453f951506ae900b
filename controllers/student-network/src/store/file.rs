//! JSON file store

use super::{Shared, StoreError, StoreState, StoreTransaction, StudentNetworkRecord, StudentNetworkStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store persisted to a JSON file
///
/// The file is rewritten on every commit and every time an id is handed out,
/// so ids stay unique across restarts. Writes replace the file atomically
/// (sibling temp file, then rename).
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    shared: Arc<Shared>,
}

impl JsonFileStore {
    /// Open a store, starting empty when the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state: StoreState = serde_json::from_slice(&bytes)?;
                info!("Loaded {} student networks from {}", state.records.len(), path.display());
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Student network store {} does not exist yet, starting empty", path.display());
                StoreState::default()
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Self {
            shared: Shared::new(state, Some(path.clone())),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) async fn write_atomically(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(
        "Wrote {} student networks (next id {}) to {}",
        state.records.len(),
        state.next_id,
        path.display()
    );
    Ok(())
}

#[async_trait::async_trait]
impl StudentNetworkStore for JsonFileStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(self.shared.begin()))
    }

    async fn get(&self, username: &str) -> Result<Option<StudentNetworkRecord>, StoreError> {
        Ok(self.shared.committed().await.remove(username))
    }
}
