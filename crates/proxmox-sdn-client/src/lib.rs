//! Proxmox VE SDN REST API Client
//!
//! A Rust client library for the software-defined-network part of the
//! Proxmox VE API: zones, vnets, subnets, vnet firewall rules and the
//! cluster-wide "apply" task that commits staged SDN configuration.
//!
//! # Example
//!
//! ```no_run
//! use proxmox_sdn_client::{ApiToken, ProxmoxSdnClient, SdnClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let token = ApiToken::new("proxstar@pve", "sdn", "00000000-0000-0000-0000-000000000000");
//!
//! // First reachable host wins
//! let client = ProxmoxSdnClient::connect(
//!     &["pve1.example.com".to_string(), "pve2.example.com".to_string()],
//!     &token,
//!     true,
//! ).await?;
//!
//! // Staged objects are listed together with their pending state
//! let vnets = client.list_vnets().await?;
//!
//! // Commit staged changes; a task id is returned when the apply runs asynchronously
//! if let Some(upid) = client.apply_sdn().await? {
//!     println!("apply running as {upid}");
//! }
//! # let _ = vnets;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **SDN objects**: list and create zones, vnets, subnets and vnet firewall rules
//! - **Apply tracking**: submit the SDN apply and poll its task status
//! - **Failover**: connect to the first reachable host out of a list
//! - **Mocking**: `MockSdnClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod sdn_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ApiToken, ProxmoxSdnClient};
pub use common::{DataEnvelope, HttpClient};
pub use error::SdnError;
pub use models::*;
pub use sdn_trait::SdnClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockCalls, MockSdnClient};
