//! SdnClientTrait for mocking
//!
//! This trait abstracts the Proxmox SDN client so the reconciliation engine
//! can be driven by an in-memory implementation in unit tests.

use crate::error::SdnError;
use crate::models::*;

/// Trait for Proxmox SDN API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Creation calls only stage configuration; nothing takes effect on the
/// cluster until `apply_sdn` runs.
#[async_trait::async_trait]
pub trait SdnClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// API version; doubles as a connectivity and token check
    async fn version(&self) -> Result<Version, SdnError>;

    // Zones
    async fn list_zones(&self) -> Result<Vec<Zone>, SdnError>;
    async fn create_zone(&self, request: &CreateZoneRequest) -> Result<(), SdnError>;

    // Vnets
    async fn list_vnets(&self) -> Result<Vec<Vnet>, SdnError>;
    async fn create_vnet(&self, request: &CreateVnetRequest) -> Result<(), SdnError>;

    // Subnets
    async fn list_subnets(&self, vnet: &str) -> Result<Vec<Subnet>, SdnError>;
    async fn create_subnet(&self, vnet: &str, request: &CreateSubnetRequest) -> Result<(), SdnError>;

    // Vnet firewall
    async fn list_vnet_firewall_rules(&self, vnet: &str) -> Result<Vec<FirewallRule>, SdnError>;
    async fn create_vnet_firewall_rule(&self, vnet: &str, request: &CreateFirewallRuleRequest) -> Result<(), SdnError>;

    // Apply
    /// Commit staged SDN configuration; returns the task UPID when the apply runs as a task
    async fn apply_sdn(&self) -> Result<Option<String>, SdnError>;
    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus, SdnError>;
}
