//! SDN operations for MockSdnClient
//!
//! Handles zones, vnets, subnets, vnet firewall rules and apply tasks.

use super::{lock, ApplyMode, MockSdnClient};
use crate::error::SdnError;
use crate::models::*;

const STAGED: &str = "new";

pub(crate) fn new_subnet(id: &str, vnet: &str, zone: &str, cidr: &str, state: Option<&str>) -> Subnet {
    Subnet {
        subnet: id.to_string(),
        cidr: Some(cidr.to_string()),
        vnet: Some(vnet.to_string()),
        zone: Some(zone.to_string()),
        gateway: None,
        snat: None,
        dhcp_range: None,
        dhcp_dns_server: None,
        state: state.map(str::to_string),
        pending: None,
    }
}

pub async fn list_zones(client: &MockSdnClient) -> Result<Vec<Zone>, SdnError> {
    client.count(|c| c.list_zones += 1);
    Ok(lock(&client.zones).values().cloned().collect())
}

pub async fn create_zone(client: &MockSdnClient, request: &CreateZoneRequest) -> Result<(), SdnError> {
    client.count(|c| c.create_zone += 1);
    let mut zones = lock(&client.zones);
    if zones.contains_key(&request.zone) {
        return Err(SdnError::AlreadyExists(format!("zone '{}' already defined", request.zone)));
    }
    zones.insert(
        request.zone.clone(),
        Zone {
            zone: request.zone.clone(),
            zone_type: request.zone_type.clone(),
            bridge: request.bridge.clone(),
            ipam: request.ipam.clone(),
            mtu: request.mtu,
            dns: request.dns.clone(),
            state: Some(STAGED.to_string()),
            pending: None,
        },
    );
    Ok(())
}

pub async fn list_vnets(client: &MockSdnClient) -> Result<Vec<Vnet>, SdnError> {
    client.count(|c| c.list_vnets += 1);
    Ok(lock(&client.vnets).values().cloned().collect())
}

pub async fn create_vnet(client: &MockSdnClient, request: &CreateVnetRequest) -> Result<(), SdnError> {
    client.count(|c| c.create_vnet += 1);
    if let Some(message) = lock(&client.vnet_failure).clone() {
        return Err(SdnError::Api { status: 500, message });
    }
    if !lock(&client.zones).contains_key(&request.zone) {
        return Err(SdnError::Api {
            status: 500,
            message: format!("zone '{}' does not exist", request.zone),
        });
    }
    let mut vnets = lock(&client.vnets);
    if vnets.contains_key(&request.vnet) {
        return Err(SdnError::AlreadyExists(format!("vnet '{}' already defined", request.vnet)));
    }
    vnets.insert(
        request.vnet.clone(),
        Vnet {
            vnet: request.vnet.clone(),
            zone: Some(request.zone.clone()),
            alias: request.alias.clone(),
            tag: request.tag,
            state: Some(STAGED.to_string()),
            pending: None,
        },
    );
    Ok(())
}

pub async fn list_subnets(client: &MockSdnClient, vnet: &str) -> Result<Vec<Subnet>, SdnError> {
    client.count(|c| c.list_subnets += 1);
    if !lock(&client.vnets).contains_key(vnet) {
        return Err(SdnError::NotFound(format!("vnet '{}' does not exist", vnet)));
    }
    Ok(lock(&client.subnets)
        .values()
        .filter(|s| s.vnet.as_deref() == Some(vnet))
        .cloned()
        .collect())
}

pub async fn create_subnet(client: &MockSdnClient, vnet: &str, request: &CreateSubnetRequest) -> Result<(), SdnError> {
    client.count(|c| c.create_subnet += 1);
    let zone = lock(&client.vnets)
        .get(vnet)
        .and_then(|v| v.zone.clone())
        .ok_or_else(|| SdnError::NotFound(format!("vnet '{}' does not exist", vnet)))?;
    let id = Subnet::subnet_id(&zone, &request.subnet);

    if lock(&client.subnet_collisions).remove(&request.subnet) {
        return Err(SdnError::AlreadyExists(format!("{} already defined", id)));
    }

    let mut subnets = lock(&client.subnets);
    if subnets.contains_key(&id) {
        return Err(SdnError::AlreadyExists(format!("{} already defined", id)));
    }
    let mut subnet = new_subnet(&id, vnet, &zone, &request.subnet, Some(STAGED));
    subnet.gateway = Some(request.gateway.clone());
    subnet.snat = request.snat;
    subnet.dhcp_range = Some(serde_json::json!(request.dhcp_range));
    subnet.dhcp_dns_server = request.dhcp_dns_server.clone();
    subnets.insert(id, subnet);
    Ok(())
}

pub async fn list_vnet_firewall_rules(client: &MockSdnClient, vnet: &str) -> Result<Vec<FirewallRule>, SdnError> {
    client.count(|c| c.list_firewall_rules += 1);
    Ok(lock(&client.firewall_rules).get(vnet).cloned().unwrap_or_default())
}

pub async fn create_vnet_firewall_rule(
    client: &MockSdnClient,
    vnet: &str,
    request: &CreateFirewallRuleRequest,
) -> Result<(), SdnError> {
    client.count(|c| c.create_firewall_rule += 1);
    if !lock(&client.vnets).contains_key(vnet) {
        return Err(SdnError::NotFound(format!("vnet '{}' does not exist", vnet)));
    }
    let mut rules = lock(&client.firewall_rules);
    let entry = rules.entry(vnet.to_string()).or_default();
    entry.push(FirewallRule {
        pos: Some(entry.len() as u32),
        rule_type: request.rule_type.clone(),
        action: request.action.clone(),
        enable: request.enable,
        comment: request.comment.clone(),
    });
    Ok(())
}

/// Clears the staged state of every object, then reports according to the apply mode
pub async fn apply_sdn(client: &MockSdnClient) -> Result<Option<String>, SdnError> {
    client.count(|c| c.apply += 1);
    let interception = lock(&client.next_apply).take();
    if let Some(interception) = interception {
        tokio::time::sleep(interception.delay).await;
        if let Some(message) = interception.failure {
            return Err(SdnError::Api { status: 500, message });
        }
    }
    let mode = lock(&client.apply_mode).clone();

    if mode != ApplyMode::Stuck {
        for zone in lock(&client.zones).values_mut() {
            zone.state = None;
            zone.pending = None;
        }
        for vnet in lock(&client.vnets).values_mut() {
            vnet.state = None;
            vnet.pending = None;
        }
        for subnet in lock(&client.subnets).values_mut() {
            subnet.state = None;
            subnet.pending = None;
        }
    }

    let status = match mode {
        ApplyMode::Synchronous => return Ok(None),
        ApplyMode::Stuck => TaskStatus {
            status: "running".to_string(),
            exitstatus: None,
            upid: None,
            node: Some(client.node.clone()),
        },
        ApplyMode::Task { exit_status } => TaskStatus {
            status: "stopped".to_string(),
            exitstatus: Some(exit_status),
            upid: None,
            node: Some(client.node.clone()),
        },
    };

    let upid = client.next_upid();
    let mut status = status;
    status.upid = Some(upid.clone());
    lock(&client.tasks).insert(upid.clone(), status);
    Ok(Some(upid))
}

pub async fn task_status(client: &MockSdnClient, node: &str, upid: &str) -> Result<TaskStatus, SdnError> {
    client.count(|c| c.task_status += 1);
    if node != client.node {
        return Err(SdnError::NotFound(format!("node '{}' does not exist", node)));
    }
    lock(&client.tasks)
        .get(upid)
        .cloned()
        .ok_or_else(|| SdnError::NotFound(format!("task '{}' not found", upid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdn_trait::SdnClientTrait;

    fn subnet_request(cidr: &str) -> CreateSubnetRequest {
        CreateSubnetRequest {
            subnet: cidr.to_string(),
            subnet_type: "subnet".to_string(),
            gateway: "10.0.0.1".to_string(),
            dhcp_range: vec![],
            snat: None,
            dhcp_dns_server: None,
        }
    }

    #[tokio::test]
    async fn test_subnets_are_zone_scoped() {
        let mock = MockSdnClient::new("http://test-pve");
        mock.add_zone("zone", "simple");
        mock.add_vnet("a", "zone", None);
        mock.add_vnet("b", "zone", None);

        mock.create_subnet("a", &subnet_request("10.0.0.0/24")).await.unwrap();
        let err = mock.create_subnet("b", &subnet_request("10.0.0.0/24")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_apply_clears_staged_state() {
        let mock = MockSdnClient::new("http://test-pve");
        mock.add_zone("zone", "simple");
        mock.create_vnet(&CreateVnetRequest {
            vnet: "s1".to_string(),
            zone: "zone".to_string(),
            alias: None,
            tag: None,
        })
        .await
        .unwrap();
        assert!(mock.vnet("s1").unwrap().is_pending());

        let upid = mock.apply_sdn().await.unwrap().unwrap();
        assert!(!mock.vnet("s1").unwrap().is_pending());

        let node = upid_node(&upid).unwrap();
        let status = mock.task_status(node, &upid).await.unwrap();
        assert!(status.succeeded());
    }

    #[tokio::test]
    async fn test_collision_injection_fires_once() {
        let mock = MockSdnClient::new("http://test-pve");
        mock.add_zone("zone", "simple");
        mock.add_vnet("a", "zone", None);
        mock.collide_subnet_once("10.0.0.0/24");

        assert!(mock.create_subnet("a", &subnet_request("10.0.0.0/24")).await.is_err());
        assert!(mock.create_subnet("a", &subnet_request("10.0.0.0/24")).await.is_ok());
        assert_eq!(mock.calls().create_subnet, 2);
    }

    #[tokio::test]
    async fn test_failed_apply_is_one_shot_and_keeps_staged_state() {
        let mock = MockSdnClient::new("http://test-pve");
        mock.add_zone("zone", "simple");
        mock.create_vnet(&CreateVnetRequest {
            vnet: "s1".to_string(),
            zone: "zone".to_string(),
            alias: None,
            tag: None,
        })
        .await
        .unwrap();
        mock.fail_next_apply_after(std::time::Duration::from_millis(1), "boom");

        let err = mock.apply_sdn().await.unwrap_err();
        assert!(matches!(err, SdnError::Api { status: 500, .. }));
        assert!(mock.vnet("s1").unwrap().is_pending());

        assert!(mock.apply_sdn().await.unwrap().is_some());
        assert!(!mock.vnet("s1").unwrap().is_pending());
    }
}
