//! Proxmox SDN API client
//!
//! Implements the `/cluster/sdn` part of the Proxmox VE REST API plus the
//! node task-status endpoint used to follow an SDN apply.

use crate::common::HttpClient;
use crate::error::SdnError;
use crate::models::*;
use crate::sdn_trait::SdnClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default Proxmox API port
const DEFAULT_PORT: u16 = 8006;

/// Per-request timeout for API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing parameters that include staged objects and their state
const PENDING: &[(&str, &str)] = &[("pending", "1")];

/// Proxmox API token credentials
#[derive(Debug, Clone)]
pub struct ApiToken {
    /// User including realm, e.g. `proxstar@pve`
    pub user: String,
    pub token_name: String,
    pub token_value: String,
}

impl ApiToken {
    pub fn new(user: impl Into<String>, token_name: impl Into<String>, token_value: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token_name: token_name.into(),
            token_value: token_value.into(),
        }
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        format!("PVEAPIToken={}!{}={}", self.user, self.token_name, self.token_value)
    }
}

/// Proxmox SDN API client
pub struct ProxmoxSdnClient {
    http: HttpClient,
}

impl ProxmoxSdnClient {
    /// Create a new client for one host
    ///
    /// # Arguments
    /// * `host` - Host name, `host:port`, or full URL (e.g. `https://pve1:8006`)
    /// * `token` - API token credentials
    /// * `verify_tls` - Verify the server certificate (clusters commonly run self-signed)
    pub fn new(host: &str, token: &ApiToken, verify_tls: bool) -> Result<Self, SdnError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(SdnError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, Self::api_url(host), token.header_value()),
        })
    }

    /// Connect to the first reachable host
    ///
    /// Each host is validated with a `/version` call before it is returned.
    /// When every host fails, the last error is returned.
    pub async fn connect(hosts: &[String], token: &ApiToken, verify_tls: bool) -> Result<Self, SdnError> {
        let mut last_error = None;
        for host in hosts {
            let client = Self::new(host, token, verify_tls)?;
            match client.version().await {
                Ok(version) => {
                    info!("Connected to Proxmox {} at {}", version.version, client.base_url());
                    return Ok(client);
                }
                Err(e) => {
                    warn!("Unable to connect to Proxmox host {}: {}", host, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SdnError::InvalidResponse("no Proxmox hosts configured".to_string())))
    }

    /// Normalize a configured host into the API base URL
    pub fn api_url(host: &str) -> String {
        let host = host.trim().trim_end_matches('/');
        let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else if host.contains(':') {
            format!("https://{}", host)
        } else {
            format!("https://{}:{}", host, DEFAULT_PORT)
        };
        if with_scheme.ends_with("/api2/json") {
            with_scheme
        } else {
            format!("{}/api2/json", with_scheme)
        }
    }

    fn pending_query(path: &str) -> String {
        format!("{}?{}", path, HttpClient::build_query_string(PENDING))
    }

    fn vnet_path(vnet: &str) -> String {
        format!("/cluster/sdn/vnets/{}", HttpClient::encode_segment(vnet))
    }
}

#[async_trait::async_trait]
impl SdnClientTrait for ProxmoxSdnClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn version(&self) -> Result<Version, SdnError> {
        self.http.get("/version").await
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, SdnError> {
        debug!("Listing SDN zones");
        self.http.get(&Self::pending_query("/cluster/sdn/zones")).await
    }

    async fn create_zone(&self, request: &CreateZoneRequest) -> Result<(), SdnError> {
        debug!("Creating SDN zone {}", request.zone);
        let body = serde_json::to_value(request)?;
        self.http.post("/cluster/sdn/zones", &body).await
    }

    async fn list_vnets(&self) -> Result<Vec<Vnet>, SdnError> {
        debug!("Listing SDN vnets");
        self.http.get(&Self::pending_query("/cluster/sdn/vnets")).await
    }

    async fn create_vnet(&self, request: &CreateVnetRequest) -> Result<(), SdnError> {
        debug!("Creating SDN vnet {} in zone {}", request.vnet, request.zone);
        let body = serde_json::to_value(request)?;
        self.http.post("/cluster/sdn/vnets", &body).await
    }

    async fn list_subnets(&self, vnet: &str) -> Result<Vec<Subnet>, SdnError> {
        debug!("Listing subnets of vnet {}", vnet);
        let path = format!("{}/subnets", Self::vnet_path(vnet));
        self.http.get(&Self::pending_query(&path)).await
    }

    async fn create_subnet(&self, vnet: &str, request: &CreateSubnetRequest) -> Result<(), SdnError> {
        debug!("Creating subnet {} on vnet {}", request.subnet, vnet);
        let path = format!("{}/subnets", Self::vnet_path(vnet));
        let body = serde_json::to_value(request)?;
        self.http.post(&path, &body).await
    }

    async fn list_vnet_firewall_rules(&self, vnet: &str) -> Result<Vec<FirewallRule>, SdnError> {
        debug!("Listing firewall rules of vnet {}", vnet);
        let path = format!("{}/firewall/rules", Self::vnet_path(vnet));
        self.http.get(&path).await
    }

    async fn create_vnet_firewall_rule(&self, vnet: &str, request: &CreateFirewallRuleRequest) -> Result<(), SdnError> {
        debug!("Creating {} firewall rule {} on vnet {}", request.rule_type, request.action, vnet);
        let path = format!("{}/firewall/rules", Self::vnet_path(vnet));
        let body = serde_json::to_value(request)?;
        self.http.post(&path, &body).await
    }

    async fn apply_sdn(&self) -> Result<Option<String>, SdnError> {
        debug!("Applying staged SDN configuration");
        self.http.put("/cluster/sdn", None).await
    }

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatus, SdnError> {
        let path = format!(
            "/nodes/{}/tasks/{}/status",
            HttpClient::encode_segment(node),
            HttpClient::encode_segment(upid)
        );
        self.http.get(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_normalization() {
        assert_eq!(ProxmoxSdnClient::api_url("pve1.example.com"), "https://pve1.example.com:8006/api2/json");
        assert_eq!(ProxmoxSdnClient::api_url("pve1:443"), "https://pve1:443/api2/json");
        assert_eq!(ProxmoxSdnClient::api_url("http://localhost:8006/"), "http://localhost:8006/api2/json");
        assert_eq!(
            ProxmoxSdnClient::api_url("https://pve1:8006/api2/json"),
            "https://pve1:8006/api2/json"
        );
    }

    #[test]
    fn test_token_header() {
        let token = ApiToken::new("proxstar@pve", "sdn", "secret");
        assert_eq!(token.header_value(), "PVEAPIToken=proxstar@pve!sdn=secret");
    }

    #[tokio::test]
    async fn test_connect_without_hosts_fails() {
        let token = ApiToken::new("proxstar@pve", "sdn", "secret");
        let result = ProxmoxSdnClient::connect(&[], &token, true).await;
        assert!(matches!(result, Err(SdnError::InvalidResponse(_))));
    }
}
