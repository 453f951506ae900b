//! Proxmox SDN API models
//!
//! These models match the `/cluster/sdn` endpoints of the Proxmox VE API.
//! Listing endpoints are queried with `pending=1`, so objects that are staged
//! but not yet applied carry a `state` (`new`, `changed`, `deleted`) and, for
//! changed objects, a `pending` map with the staged values.

use serde::{Deserialize, Serialize};

/// SDN zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<serde_json::Value>,
}

/// SDN vnet (virtual network bound to a zone)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vnet {
    pub vnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<serde_json::Value>,
}

impl Vnet {
    /// Staged but not yet applied (new, changed or marked for deletion)
    pub fn is_pending(&self) -> bool {
        self.state.is_some() || self.pending.is_some()
    }

    /// Zone the vnet belongs to, preferring a staged zone change
    pub fn effective_zone(&self) -> Option<&str> {
        self.pending
            .as_ref()
            .and_then(|p| p.get("zone"))
            .and_then(|z| z.as_str())
            .or(self.zone.as_deref())
    }
}

/// SDN subnet attached to a vnet
///
/// The provider identifies subnets as `<zone>-<address>-<prefix length>`
/// (e.g. `proxstar-sdn-10.100.1.0-24`) and also reports the CIDR separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snat: Option<u8>,
    #[serde(rename = "dhcp-range", default, skip_serializing_if = "Option::is_none")]
    pub dhcp_range: Option<serde_json::Value>,
    #[serde(rename = "dhcp-dns-server", default, skip_serializing_if = "Option::is_none")]
    pub dhcp_dns_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<serde_json::Value>,
}

impl Subnet {
    /// Build the provider id of a subnet in a zone
    pub fn subnet_id(zone: &str, cidr: &str) -> String {
        format!("{}-{}", zone, cidr.replace('/', "-"))
    }

    /// CIDR of the subnet, from the explicit field or parsed out of the id
    pub fn cidr(&self) -> Option<String> {
        if let Some(cidr) = &self.cidr {
            return Some(cidr.clone());
        }
        // <zone>-<a.b.c.d>-<len>: zone names may themselves contain dashes
        let (rest, len) = self.subnet.rsplit_once('-')?;
        let (_, address) = rest.rsplit_once('-')?;
        if address.split('.').count() != 4 || len.parse::<u8>().is_err() {
            return None;
        }
        Some(format!("{}/{}", address, len))
    }

    /// Staged but not yet applied
    pub fn is_pending(&self) -> bool {
        self.state.is_some() || self.pending.is_some()
    }
}

/// Firewall rule on a vnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<u32>,
    #[serde(rename = "type")]
    pub rule_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl FirewallRule {
    /// Whether this rule attaches the named security group
    pub fn is_group(&self, group: &str) -> bool {
        self.rule_type == "group" && self.action == group
    }
}

/// Task status returned by `/nodes/{node}/tasks/{upid}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// `running` or `stopped`
    pub status: String,
    /// Set once stopped; `OK` on a clean exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitstatus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Stopped with a clean exit status
    pub fn succeeded(&self) -> bool {
        !self.is_running() && self.exitstatus.as_deref() == Some("OK")
    }
}

/// `/version` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repoid: Option<String>,
}

/// Node that owns a task, taken from its UPID (`UPID:<node>:<pid>:...`)
pub fn upid_node(upid: &str) -> Option<&str> {
    let mut parts = upid.split(':');
    if parts.next()? != "UPID" {
        return None;
    }
    parts.next().filter(|node| !node.is_empty())
}

/// Request body for creating a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateZoneRequest {
    pub zone: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

/// Request body for creating a vnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVnetRequest {
    pub vnet: String,
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
}

/// Request body for creating a subnet on a vnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubnetRequest {
    pub subnet: String,
    #[serde(rename = "type")]
    pub subnet_type: String,
    pub gateway: String,
    /// Entries of the form `start-address=<ip>,end-address=<ip>`
    #[serde(rename = "dhcp-range", default, skip_serializing_if = "Vec::is_empty")]
    pub dhcp_range: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snat: Option<u8>,
    #[serde(rename = "dhcp-dns-server", default, skip_serializing_if = "Option::is_none")]
    pub dhcp_dns_server: Option<String>,
}

/// Request body for creating a vnet firewall rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFirewallRuleRequest {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CreateFirewallRuleRequest {
    /// Rule that attaches a security group to the vnet
    pub fn group(name: &str, comment: Option<String>) -> Self {
        Self {
            rule_type: "group".to_string(),
            action: name.to_string(),
            enable: Some(1),
            comment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_cidr_from_id() {
        let subnet: Subnet = serde_json::from_value(serde_json::json!({
            "subnet": "proxstar-sdn-10.100.4.0-24",
            "vnet": "s4",
            "type": "subnet"
        }))
        .unwrap();
        assert_eq!(subnet.cidr().as_deref(), Some("10.100.4.0/24"));
    }

    #[test]
    fn test_subnet_cidr_prefers_explicit_field() {
        let subnet: Subnet = serde_json::from_value(serde_json::json!({
            "subnet": "zone-10.0.0.0-24",
            "cidr": "10.0.0.0/24"
        }))
        .unwrap();
        assert_eq!(subnet.cidr().as_deref(), Some("10.0.0.0/24"));
        assert_eq!(Subnet::subnet_id("zone", "10.0.0.0/24"), "zone-10.0.0.0-24");
    }

    #[test]
    fn test_subnet_cidr_rejects_garbage() {
        let subnet: Subnet = serde_json::from_value(serde_json::json!({ "subnet": "not-a-subnet" })).unwrap();
        assert_eq!(subnet.cidr(), None);
    }

    #[test]
    fn test_vnet_pending_state() {
        let applied: Vnet = serde_json::from_value(serde_json::json!({
            "vnet": "s1", "zone": "proxstar-sdn", "alias": "Proxstar alice"
        }))
        .unwrap();
        assert!(!applied.is_pending());

        let staged: Vnet = serde_json::from_value(serde_json::json!({
            "vnet": "s2", "zone": "proxstar-sdn", "state": "new"
        }))
        .unwrap();
        assert!(staged.is_pending());

        let moved: Vnet = serde_json::from_value(serde_json::json!({
            "vnet": "s3", "zone": "old", "state": "changed", "pending": { "zone": "proxstar-sdn" }
        }))
        .unwrap();
        assert_eq!(moved.effective_zone(), Some("proxstar-sdn"));
    }

    #[test]
    fn test_task_status() {
        let running = TaskStatus { status: "running".into(), exitstatus: None, upid: None, node: None };
        assert!(running.is_running());
        assert!(!running.succeeded());

        let ok = TaskStatus { status: "stopped".into(), exitstatus: Some("OK".into()), upid: None, node: None };
        assert!(ok.succeeded());

        let failed = TaskStatus { status: "stopped".into(), exitstatus: Some("command 'ifreload -a' failed".into()), upid: None, node: None };
        assert!(!failed.succeeded());
    }

    #[test]
    fn test_upid_node() {
        assert_eq!(upid_node("UPID:pve2:00001A2B:0001C3D4:65F00000:reloadnetworkall::root@pam:"), Some("pve2"));
        assert_eq!(upid_node("pve2:123"), None);
        assert_eq!(upid_node("UPID::"), None);
    }

    #[test]
    fn test_create_subnet_request_wire_names() {
        let request = CreateSubnetRequest {
            subnet: "10.0.0.0/24".into(),
            subnet_type: "subnet".into(),
            gateway: "10.0.0.1".into(),
            dhcp_range: vec!["start-address=10.0.0.50,end-address=10.0.0.200".into()],
            snat: None,
            dhcp_dns_server: Some("10.0.0.2".into()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "subnet");
        assert_eq!(value["dhcp-range"][0], "start-address=10.0.0.50,end-address=10.0.0.200");
        assert_eq!(value["dhcp-dns-server"], "10.0.0.2");
        assert!(value.get("snat").is_none());
    }
}
