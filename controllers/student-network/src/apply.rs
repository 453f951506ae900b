//! Committing staged SDN changes.
//!
//! `PUT /cluster/sdn` either applies synchronously or hands back a task UPID.
//! Tasks are polled on their node until they stop or the timeout expires.

use crate::config::SdnConfig;
use crate::error::NetworkError;
use proxmox_sdn_client::{upid_node, SdnClientTrait};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Applies staged controller changes and waits for the reload task
#[derive(Clone)]
pub struct ApplyCoordinator {
    client: Arc<dyn SdnClientTrait>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ApplyCoordinator {
    pub fn new(client: Arc<dyn SdnClientTrait>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client,
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(client: Arc<dyn SdnClientTrait>, config: &SdnConfig) -> Self {
        Self::new(client, config.apply_timeout, config.apply_poll_interval)
    }

    /// Apply and wait; any failure or timeout is an error
    pub async fn apply(&self) -> Result<(), NetworkError> {
        info!("Applying SDN configuration");
        let Some(upid) = self.client.apply_sdn().await? else {
            debug!("SDN apply returned no task, assuming it completed");
            return Ok(());
        };

        let node = upid_node(&upid)
            .ok_or_else(|| NetworkError::ApplyFailed(format!("malformed task id {}", upid)))?;
        debug!("Waiting for SDN apply task {} on {}", upid, node);

        match tokio::time::timeout(self.timeout, self.wait_for_task(node, &upid)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("SDN apply task {} still running after {:?}", upid, self.timeout);
                Err(NetworkError::ApplyTimeout(self.timeout))
            }
        }
    }

    /// Non-raising form of [`apply`](Self::apply)
    pub async fn try_apply(&self) -> bool {
        match self.apply().await {
            Ok(()) => true,
            Err(e) => {
                warn!("SDN apply failed: {}", e);
                false
            }
        }
    }

    async fn wait_for_task(&self, node: &str, upid: &str) -> Result<(), NetworkError> {
        loop {
            let status = self.client.task_status(node, upid).await?;
            if status.is_running() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            if status.succeeded() {
                info!("SDN apply task {} finished", upid);
                return Ok(());
            }
            let exit = status.exitstatus.unwrap_or_else(|| "unknown exit status".to_string());
            return Err(NetworkError::ApplyFailed(format!("task {} stopped: {}", upid, exit)));
        }
    }
}
