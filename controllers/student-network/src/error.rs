//! Reconciler error types.
//!
//! Collisions are a distinguished variant so the reconciler can branch on
//! them without inspecting provider error text.

use crate::store::StoreError;
use proxmox_sdn_client::SdnError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while ensuring a student network.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Invalid or inconsistent configuration; never retried
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The controller already has this subnet defined elsewhere in the zone,
    /// typically because a concurrent allocation claimed it first
    #[error("Subnet {cidr} is already defined on the SDN controller")]
    SubnetCollision { cidr: String },

    /// A vnet with this id exists but carries another user's alias
    #[error("Vnet {vnet_id} belongs to {owner:?}, not {alias:?}")]
    VnetOwnedByOther {
        vnet_id: String,
        alias: String,
        owner: Option<String>,
    },

    /// Every block of the base address space is taken
    #[error("No available subnets in SDN base CIDR {0}")]
    SubnetSpaceExhausted(String),

    /// Every allocation attempt collided
    #[error("Subnet allocation failed after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    /// The apply task finished with a non-clean exit status
    #[error("SDN apply failed: {0}")]
    ApplyFailed(String),

    /// The apply task did not finish in time
    #[error("SDN apply did not finish within {0:?}")]
    ApplyTimeout(Duration),

    /// Controller transport or API error
    #[error("SDN controller error: {0}")]
    Sdn(#[from] SdnError),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
