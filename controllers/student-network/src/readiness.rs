//! Detects whether a recorded network is fully provisioned.

use crate::config::SdnConfig;
use crate::error::NetworkError;
use crate::gateway::SdnGateway;
use tracing::debug;

/// Checks live controller state against a recorded vnet/subnet pair
#[derive(Clone)]
pub struct ReadinessChecker {
    gateway: SdnGateway,
    firewall_group: Option<String>,
}

impl ReadinessChecker {
    pub fn new(gateway: SdnGateway, config: &SdnConfig) -> Self {
        Self {
            gateway,
            firewall_group: config.firewall_group.clone(),
        }
    }

    /// True when the vnet is applied in the configured zone under `alias`,
    /// the subnet is applied on it, and the security group (if any) is attached
    pub async fn is_ready(&self, vnet_id: &str, subnet_cidr: &str, alias: &str) -> Result<bool, NetworkError> {
        let Some(vnet) = self.gateway.find_vnet(vnet_id).await? else {
            debug!("Vnet {} does not exist", vnet_id);
            return Ok(false);
        };
        if vnet.alias.as_deref() != Some(alias) {
            debug!("Vnet {} carries alias {:?}, not {:?}", vnet_id, vnet.alias, alias);
            return Ok(false);
        }
        if vnet.is_pending() {
            debug!("Vnet {} has pending changes", vnet_id);
            return Ok(false);
        }
        if vnet.effective_zone() != Some(self.gateway.zone_name()) {
            debug!("Vnet {} is not in zone {}", vnet_id, self.gateway.zone_name());
            return Ok(false);
        }

        let subnets = self.gateway.vnet_subnets(vnet_id).await?;
        match subnets.iter().find(|s| s.cidr().as_deref() == Some(subnet_cidr)) {
            None => {
                debug!("Subnet {} is missing on vnet {}", subnet_cidr, vnet_id);
                return Ok(false);
            }
            Some(subnet) if subnet.is_pending() => {
                debug!("Subnet {} on vnet {} has pending changes", subnet_cidr, vnet_id);
                return Ok(false);
            }
            Some(_) => {}
        }

        if let Some(group) = &self.firewall_group {
            let rules = self.gateway.vnet_firewall_rules(vnet_id).await?;
            if !rules.iter().any(|r| r.is_group(group)) {
                debug!("Vnet {} lacks security group {}", vnet_id, group);
                return Ok(false);
            }
        }

        Ok(true)
    }
}
