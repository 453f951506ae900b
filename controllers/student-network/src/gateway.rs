//! Idempotent operations on the SDN controller.
//!
//! Every `ensure_*` call lists what exists first and only stages a creation
//! when nothing matching is found. Nothing here applies staged changes; that
//! is the job of [`crate::apply::ApplyCoordinator`].

use crate::allocator::{gateway_address, offset_address};
use crate::config::SdnConfig;
use crate::error::NetworkError;
use ipnetwork::Ipv4Network;
use proxmox_sdn_client::{
    CreateFirewallRuleRequest, CreateSubnetRequest, CreateVnetRequest, CreateZoneRequest, FirewallRule,
    SdnClientTrait, SdnError, Subnet, Vnet,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thin adapter over the controller client, bound to the configured zone
#[derive(Clone)]
pub struct SdnGateway {
    client: Arc<dyn SdnClientTrait>,
    config: SdnConfig,
}

impl SdnGateway {
    pub fn new(client: Arc<dyn SdnClientTrait>, config: SdnConfig) -> Self {
        Self { client, config }
    }

    pub fn zone_name(&self) -> &str {
        &self.config.zone_name
    }

    /// Stage creation of the zone if it is missing
    ///
    /// Returns `true` when a creation was staged.
    pub async fn ensure_zone(&self) -> Result<bool, NetworkError> {
        let zones = self.client.list_zones().await?;
        if let Some(zone) = zones.iter().find(|z| z.zone == self.config.zone_name) {
            if zone.zone_type != self.config.zone_type {
                warn!(
                    "SDN zone {} has type {}, configured type is {}",
                    zone.zone, zone.zone_type, self.config.zone_type
                );
            }
            debug!("SDN zone {} exists", zone.zone);
            return Ok(false);
        }

        let request = CreateZoneRequest {
            zone: self.config.zone_name.clone(),
            zone_type: self.config.zone_type.clone(),
            bridge: self.config.zone_bridge.clone(),
            ipam: self.config.zone_ipam.clone(),
            mtu: self.config.zone_mtu,
            dns: self.config.zone_dns.clone(),
        };
        info!("Creating SDN zone {} ({})", request.zone, request.zone_type);
        match self.client.create_zone(&request).await {
            Ok(()) => Ok(true),
            Err(SdnError::AlreadyExists(message)) => {
                debug!("SDN zone {} created concurrently: {}", request.zone, message);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_vnet(&self, vnet_id: &str) -> Result<Option<Vnet>, NetworkError> {
        let vnets = self.client.list_vnets().await?;
        Ok(vnets.into_iter().find(|v| v.vnet == vnet_id))
    }

    /// Vnet in the configured zone whose alias is exactly `alias`
    pub async fn find_vnet_by_alias(&self, alias: &str) -> Result<Option<Vnet>, NetworkError> {
        let zone = self.config.zone_name.as_str();
        let vnets = self.client.list_vnets().await?;
        let mut matches = vnets
            .into_iter()
            .filter(|v| v.alias.as_deref() == Some(alias) && v.effective_zone() == Some(zone));
        let first = matches.next();
        let others = matches.count();
        if let (Some(vnet), true) = (&first, others > 0) {
            warn!("{} more vnets share alias {:?}, using {}", others, alias, vnet.vnet);
        }
        Ok(first)
    }

    pub async fn vnet_subnets(&self, vnet_id: &str) -> Result<Vec<Subnet>, NetworkError> {
        Ok(self.client.list_subnets(vnet_id).await?)
    }

    /// CIDRs of every subnet on every vnet, staged ones included
    pub async fn controller_subnets(&self) -> Result<Vec<String>, NetworkError> {
        let mut cidrs = Vec::new();
        for vnet in self.client.list_vnets().await? {
            let subnets = self.client.list_subnets(&vnet.vnet).await?;
            cidrs.extend(subnets.iter().filter_map(Subnet::cidr));
        }
        debug!("Controller has {} subnets", cidrs.len());
        Ok(cidrs)
    }

    pub async fn vnet_firewall_rules(&self, vnet_id: &str) -> Result<Vec<FirewallRule>, NetworkError> {
        Ok(self.client.list_vnet_firewall_rules(vnet_id).await?)
    }

    /// Stage creation of the vnet if it is missing
    ///
    /// An existing vnet must carry `alias` and sit in the configured zone;
    /// otherwise [`NetworkError::VnetOwnedByOther`] or
    /// [`NetworkError::Configuration`] is returned and nothing is staged.
    pub async fn ensure_vnet(&self, vnet_id: &str, alias: &str) -> Result<bool, NetworkError> {
        if let Some(vnet) = self.find_vnet(vnet_id).await? {
            if vnet.alias.as_deref() != Some(alias) {
                warn!("Vnet {} exists with alias {:?}, expected {:?}", vnet_id, vnet.alias, alias);
                return Err(NetworkError::VnetOwnedByOther {
                    vnet_id: vnet_id.to_string(),
                    alias: alias.to_string(),
                    owner: vnet.alias,
                });
            }
            if vnet.effective_zone() != Some(self.config.zone_name.as_str()) {
                return Err(NetworkError::Configuration(format!(
                    "vnet {} belongs to zone {:?}, expected {}",
                    vnet_id,
                    vnet.effective_zone(),
                    self.config.zone_name
                )));
            }
            debug!("Vnet {} exists", vnet_id);
            return Ok(false);
        }

        let request = CreateVnetRequest {
            vnet: vnet_id.to_string(),
            zone: self.config.zone_name.clone(),
            alias: Some(alias.to_string()),
            tag: self.config.vnet_vlan_tag,
        };
        info!("Creating vnet {} ({}) in zone {}", vnet_id, alias, request.zone);
        match self.client.create_vnet(&request).await {
            Ok(()) => Ok(true),
            Err(SdnError::AlreadyExists(message)) => {
                debug!("Vnet {} created concurrently: {}", vnet_id, message);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stage creation of the subnet on the vnet if it is missing
    ///
    /// A provider "already defined" rejection for a CIDR that is not on this
    /// vnet is reported as [`NetworkError::SubnetCollision`].
    pub async fn ensure_subnet(&self, vnet_id: &str, subnet: Ipv4Network) -> Result<bool, NetworkError> {
        let cidr = subnet.to_string();
        if self.has_subnet(vnet_id, &cidr).await? {
            debug!("Subnet {} exists on vnet {}", cidr, vnet_id);
            return Ok(false);
        }

        let request = self.subnet_request(subnet);
        info!("Creating subnet {} on vnet {}", cidr, vnet_id);
        match self.client.create_subnet(vnet_id, &request).await {
            Ok(()) => Ok(true),
            Err(SdnError::AlreadyExists(message)) => {
                if self.has_subnet(vnet_id, &cidr).await? {
                    debug!("Subnet {} created concurrently on vnet {}", cidr, vnet_id);
                    return Ok(false);
                }
                warn!("Subnet {} is already defined elsewhere: {}", cidr, message);
                Err(NetworkError::SubnetCollision { cidr })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stage a rule attaching the security group to the vnet if it is missing
    pub async fn ensure_firewall_group_rule(&self, vnet_id: &str, group: &str) -> Result<bool, NetworkError> {
        let rules = self.vnet_firewall_rules(vnet_id).await?;
        if rules.iter().any(|r| r.is_group(group)) {
            debug!("Vnet {} already has security group {}", vnet_id, group);
            return Ok(false);
        }

        info!("Attaching security group {} to vnet {}", group, vnet_id);
        let request = CreateFirewallRuleRequest::group(group, Some(format!("{} managed", self.config.vnet_alias_prefix)));
        match self.client.create_vnet_firewall_rule(vnet_id, &request).await {
            Ok(()) => Ok(true),
            Err(SdnError::AlreadyExists(message)) => {
                debug!("Security group {} attached concurrently: {}", group, message);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn has_subnet(&self, vnet_id: &str, cidr: &str) -> Result<bool, NetworkError> {
        let subnets = self.vnet_subnets(vnet_id).await?;
        Ok(subnets.iter().any(|s| s.cidr().as_deref() == Some(cidr)))
    }

    fn subnet_request(&self, subnet: Ipv4Network) -> CreateSubnetRequest {
        let start = offset_address(subnet, self.config.dhcp_start_offset);
        let end = offset_address(subnet, self.config.dhcp_end_offset);
        CreateSubnetRequest {
            subnet: subnet.to_string(),
            subnet_type: "subnet".to_string(),
            gateway: gateway_address(subnet).to_string(),
            dhcp_range: vec![format!("start-address={},end-address={}", start, end)],
            snat: self.config.subnet_snat.then_some(1),
            dhcp_dns_server: self.config.subnet_dns.clone(),
        }
    }
}
