//! Integration tests for the Proxmox SDN client
//!
//! These tests require a running Proxmox VE cluster with SDN enabled.
//! Set PROXMOX_HOSTS, PROXMOX_USER, PROXMOX_TOKEN_NAME and PROXMOX_TOKEN_VALUE to run.

use proxmox_sdn_client::{upid_node, ApiToken, ProxmoxSdnClient, SdnClientTrait};

async fn connect() -> ProxmoxSdnClient {
    let hosts: Vec<String> = std::env::var("PROXMOX_HOSTS")
        .unwrap_or_else(|_| "localhost".to_string())
        .split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    let token = ApiToken::new(
        std::env::var("PROXMOX_USER").expect("PROXMOX_USER environment variable must be set"),
        std::env::var("PROXMOX_TOKEN_NAME").expect("PROXMOX_TOKEN_NAME environment variable must be set"),
        std::env::var("PROXMOX_TOKEN_VALUE").expect("PROXMOX_TOKEN_VALUE environment variable must be set"),
    );

    ProxmoxSdnClient::connect(&hosts, &token, false)
        .await
        .expect("Failed to connect to any Proxmox host")
}

#[tokio::test]
#[ignore] // Requires running Proxmox cluster
async fn test_version() {
    let client = connect().await;
    let version = client.version().await.expect("Failed to query version");
    println!("Proxmox VE {}", version.version);
}

#[tokio::test]
#[ignore]
async fn test_list_zones_and_vnets() {
    let client = connect().await;

    let zones = client.list_zones().await.expect("Failed to list zones");
    println!("Found {} zones", zones.len());

    let vnets = client.list_vnets().await.expect("Failed to list vnets");
    println!("Found {} vnets", vnets.len());

    for vnet in vnets.iter().take(5) {
        let subnets = client.list_subnets(&vnet.vnet).await.expect("Failed to list subnets");
        println!("vnet {} has {} subnets", vnet.vnet, subnets.len());
    }
}

#[tokio::test]
#[ignore]
async fn test_apply_reports_task() {
    let client = connect().await;

    // Applying with nothing staged is harmless and still spawns a reload task
    if let Some(upid) = client.apply_sdn().await.expect("Failed to apply SDN") {
        let node = upid_node(&upid).expect("UPID without node");
        let status = client.task_status(node, &upid).await.expect("Failed to query task");
        println!("apply task {} is {}", upid, status.status);
    }
}
