//! Student Network CLI
//!
//! Ensures the SDN network of one user and prints `<vnet> <subnet>`:
//!
//! ```text
//! student-network <username>
//! ```
//!
//! Controller access comes from `PROXMOX_*` variables, SDN layout from
//! `SDN_*` variables, and records are kept in the JSON file named by
//! `STUDENT_NETWORK_STORE`.

use anyhow::{bail, Context};
use proxmox_sdn_client::ProxmoxSdnClient;
use std::env;
use std::sync::Arc;
use student_network::{JsonFileStore, ProxmoxConfig, SdnConfig, StudentNetworkReconciler};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE_PATH: &str = "student-networks.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(username), None) = (args.next(), args.next()) else {
        bail!("usage: student-network <username>");
    };

    let proxmox = ProxmoxConfig::from_env()?;
    let sdn = SdnConfig::from_env()?;
    let store_path = env::var("STUDENT_NETWORK_STORE").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());

    info!("Configuration:");
    info!("  Proxmox hosts: {}", proxmox.hosts.join(", "));
    info!("  SDN zone: {} ({})", sdn.zone_name, sdn.zone_type);
    info!("  Base CIDR: {} split into /{}", sdn.base_cidr, sdn.student_prefix);
    info!("  Store: {}", store_path);

    let client = ProxmoxSdnClient::connect(&proxmox.hosts, &proxmox.token(), proxmox.verify_tls)
        .await
        .context("Failed to connect to any Proxmox host")?;
    let store = JsonFileStore::open(&store_path)
        .await
        .with_context(|| format!("Failed to open student network store {}", store_path))?;

    let reconciler = StudentNetworkReconciler::new(Arc::new(client), Arc::new(store), sdn)?;
    let network = reconciler
        .ensure_student_network(&username)
        .await
        .with_context(|| format!("Failed to ensure SDN network for {}", username))?;

    println!("{} {}", network.vnet_id, network.subnet_cidr);
    Ok(())
}
