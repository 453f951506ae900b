//! Test utilities for unit testing the reconciler
//!
//! Builds a reconciler wired to a `MockSdnClient` and a store, and keeps
//! handles to both so tests can arrange and inspect state.

use crate::config::SdnConfig;
use crate::reconciler::StudentNetworkReconciler;
use crate::store::{NewStudentNetwork, StudentNetworkStore};
use proxmox_sdn_client::MockSdnClient;
use std::sync::Arc;
use std::time::Duration;

pub const ZONE: &str = "proxstar-sdn";
pub const FIREWALL_GROUP: &str = "students";

/// Default configuration with a security group and fast apply polling
pub fn test_config() -> SdnConfig {
    SdnConfig {
        firewall_group: Some(FIREWALL_GROUP.to_string()),
        apply_timeout: Duration::from_millis(100),
        apply_poll_interval: Duration::from_millis(5),
        ..SdnConfig::default()
    }
}

/// Mock controller that already has the zone applied
pub fn mock_with_zone() -> MockSdnClient {
    let mock = MockSdnClient::new("https://pve.test:8006/api2/json");
    mock.add_zone(ZONE, "simple");
    mock
}

/// Applied vnet with alias, subnet and security group
pub fn add_provisioned_network(mock: &MockSdnClient, vnet: &str, username: &str, cidr: &str) {
    mock.add_vnet(vnet, ZONE, Some(&format!("Proxstar {}", username)));
    mock.add_subnet(vnet, cidr);
    mock.add_firewall_group(vnet, FIREWALL_GROUP);
}

pub fn record(username: &str, vnet: &str, cidr: &str) -> NewStudentNetwork {
    NewStudentNetwork {
        username: username.to_string(),
        vnet_id: vnet.to_string(),
        subnet_cidr: cidr.to_string(),
    }
}

/// Reconciler over the given mock and store
pub fn create_test_reconciler<S: StudentNetworkStore + 'static>(
    mock: &MockSdnClient,
    store: &Arc<S>,
    config: SdnConfig,
) -> StudentNetworkReconciler {
    let store: Arc<S> = Arc::clone(store);
    match StudentNetworkReconciler::new(Arc::new(mock.clone()), store, config) {
        Ok(reconciler) => reconciler,
        Err(e) => panic!("test config is invalid: {}", e),
    }
}
