//! Student Network Reconciler
//!
//! Guarantees that every user of the VM self-service platform owns exactly
//! one isolated network on the Proxmox SDN controller: a vnet in the shared
//! zone, one collision-free subnet, and optionally a firewall security group.
//!
//! The single entry point is [`StudentNetworkReconciler::ensure_student_network`],
//! which reconciles three sources of truth: the persisted user → network
//! record, the live controller state, and concurrent allocations by other
//! callers (detected through the controller's "already defined" rejection).

pub mod allocator;
pub mod apply;
pub mod config;
pub mod error;
pub mod gateway;
pub mod naming;
pub mod readiness;
pub mod reconciler;
pub mod store;
#[cfg(test)]
mod test_utils;

pub use apply::ApplyCoordinator;
pub use config::{ProxmoxConfig, SdnConfig};
pub use error::NetworkError;
pub use gateway::SdnGateway;
pub use naming::VnetIdEncoder;
pub use readiness::ReadinessChecker;
pub use reconciler::{StudentNetwork, StudentNetworkReconciler};
pub use store::{
    JsonFileStore, MemoryStore, NewStudentNetwork, StoreError, StoreTransaction, StudentNetworkRecord, StudentNetworkStore,
};
