//! Runtime configuration.
//!
//! Both structs are built once (usually from the environment) and passed into
//! component constructors explicitly.

use crate::error::NetworkError;
use crate::naming::VnetIdEncoder;
use ipnetwork::Ipv4Network;
use proxmox_sdn_client::ApiToken;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Largest student prefix that still leaves room for a gateway and a DHCP range
const MAX_STUDENT_PREFIX: u8 = 30;

/// `10.100.0.0/16`
const DEFAULT_BASE_CIDR: Ipv4Network = match Ipv4Network::new_checked(Ipv4Addr::new(10, 100, 0, 0), 16) {
    Some(network) => network,
    None => panic!("invalid default base CIDR"),
};

/// Zone types that bind to a physical bridge
const BRIDGED_ZONE_TYPES: &[&str] = &["vlan", "qinq"];

/// SDN layout and allocation settings
#[derive(Debug, Clone, PartialEq)]
pub struct SdnConfig {
    pub zone_name: String,
    pub zone_type: String,
    pub zone_bridge: Option<String>,
    pub zone_ipam: Option<String>,
    pub zone_mtu: Option<u32>,
    pub zone_dns: Option<String>,
    /// Prefix of generated vnet ids
    pub vnet_id_prefix: String,
    /// Vnet alias is `"<alias prefix> <username>"`
    pub vnet_alias_prefix: String,
    pub vnet_max_len: usize,
    pub vnet_vlan_tag: Option<u32>,
    /// Security group attached to every student vnet
    pub firewall_group: Option<String>,
    pub apply_timeout: Duration,
    pub apply_poll_interval: Duration,
    pub allocate_attempts: u32,
    pub base_cidr: Ipv4Network,
    pub student_prefix: u8,
    pub dhcp_start_offset: u32,
    pub dhcp_end_offset: u32,
    pub subnet_snat: bool,
    pub subnet_dns: Option<String>,
}

impl Default for SdnConfig {
    fn default() -> Self {
        Self {
            zone_name: "proxstar-sdn".to_string(),
            zone_type: "simple".to_string(),
            zone_bridge: None,
            zone_ipam: None,
            zone_mtu: None,
            zone_dns: None,
            vnet_id_prefix: "s".to_string(),
            vnet_alias_prefix: "Proxstar".to_string(),
            vnet_max_len: 8,
            vnet_vlan_tag: None,
            firewall_group: None,
            apply_timeout: Duration::from_secs(60),
            apply_poll_interval: Duration::from_secs(1),
            allocate_attempts: 5,
            base_cidr: DEFAULT_BASE_CIDR,
            student_prefix: 24,
            dhcp_start_offset: 50,
            dhcp_end_offset: 200,
            subnet_snat: false,
            subnet_dns: None,
        }
    }
}

impl SdnConfig {
    /// Load from `SDN_*` environment variables; unset or empty values keep their defaults
    pub fn from_env() -> Result<Self, NetworkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NetworkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            zone_name: get("SDN_ZONE").unwrap_or(defaults.zone_name),
            zone_type: get("SDN_ZONE_TYPE").unwrap_or(defaults.zone_type),
            zone_bridge: get("SDN_ZONE_BRIDGE"),
            zone_ipam: get("SDN_ZONE_IPAM"),
            zone_mtu: parse_opt(&get, "SDN_ZONE_MTU")?,
            zone_dns: get("SDN_ZONE_DNS"),
            vnet_id_prefix: get("SDN_VNET_ID_PREFIX").unwrap_or(defaults.vnet_id_prefix),
            vnet_alias_prefix: get("SDN_VNET_ALIAS_PREFIX").unwrap_or(defaults.vnet_alias_prefix),
            vnet_max_len: parse_opt(&get, "SDN_VNET_MAX_LEN")?.unwrap_or(defaults.vnet_max_len),
            vnet_vlan_tag: parse_opt(&get, "SDN_VNET_VLAN")?,
            firewall_group: get("SDN_VNET_FIREWALL_GROUP"),
            apply_timeout: parse_opt(&get, "SDN_APPLY_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.apply_timeout),
            apply_poll_interval: parse_opt(&get, "SDN_APPLY_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.apply_poll_interval),
            allocate_attempts: parse_opt(&get, "SDN_SUBNET_ALLOCATE_ATTEMPTS")?.unwrap_or(defaults.allocate_attempts),
            base_cidr: parse_opt(&get, "SDN_BASE_CIDR")?.unwrap_or(defaults.base_cidr),
            student_prefix: parse_opt(&get, "SDN_STUDENT_PREFIX")?.unwrap_or(defaults.student_prefix),
            dhcp_start_offset: parse_opt(&get, "SDN_DHCP_START_OFFSET")?.unwrap_or(defaults.dhcp_start_offset),
            dhcp_end_offset: parse_opt(&get, "SDN_DHCP_END_OFFSET")?.unwrap_or(defaults.dhcp_end_offset),
            subnet_snat: get("SDN_SUBNET_SNAT").is_some_and(|v| parse_bool(&v)),
            subnet_dns: get("SDN_SUBNET_DNS"),
        })
    }

    /// Check settings that would otherwise fail deep inside a reconciliation
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.zone_name.is_empty() {
            return Err(NetworkError::Configuration("SDN zone name must not be empty".to_string()));
        }
        if BRIDGED_ZONE_TYPES.contains(&self.zone_type.as_str()) && self.zone_bridge.is_none() {
            return Err(NetworkError::Configuration(format!(
                "SDN_ZONE_BRIDGE is required for {} zones",
                self.zone_type
            )));
        }
        if self.student_prefix < self.base_cidr.prefix() || self.student_prefix > MAX_STUDENT_PREFIX {
            return Err(NetworkError::Configuration(format!(
                "student prefix /{} must be between /{} and /{}",
                self.student_prefix,
                self.base_cidr.prefix(),
                MAX_STUDENT_PREFIX
            )));
        }

        let block_size = 1u64 << (32 - u32::from(self.student_prefix));
        let start = u64::from(self.dhcp_start_offset);
        let end = u64::from(self.dhcp_end_offset);
        if start == 0 || start > end || end >= block_size - 1 {
            return Err(NetworkError::Configuration(format!(
                "DHCP offsets {}..{} do not fit a /{} subnet",
                self.dhcp_start_offset, self.dhcp_end_offset, self.student_prefix
            )));
        }

        if self.allocate_attempts == 0 {
            return Err(NetworkError::Configuration(
                "subnet allocation attempts must be at least 1".to_string(),
            ));
        }

        // every allocation may burn up to `allocate_attempts` ids, which are never reused
        let encoder = VnetIdEncoder::new(&self.vnet_id_prefix, self.vnet_max_len);
        let ids_needed = self.subnet_count().saturating_mul(u64::from(self.allocate_attempts));
        if encoder.capacity() < ids_needed {
            return Err(NetworkError::Configuration(format!(
                "vnet ids of at most {} characters with prefix '{}' can name {} records, {} subnets with {} attempts each need {}",
                self.vnet_max_len,
                encoder.prefix(),
                encoder.capacity(),
                self.subnet_count(),
                self.allocate_attempts,
                ids_needed
            )));
        }

        Ok(())
    }

    /// Alias that identifies a user's vnet on the controller
    pub fn vnet_alias(&self, username: &str) -> String {
        format!("{} {}", self.vnet_alias_prefix, username)
    }

    /// Number of student subnets the base block can hold
    pub fn subnet_count(&self) -> u64 {
        let diff = u32::from(self.student_prefix.saturating_sub(self.base_cidr.prefix()));
        1u64 << diff.min(32)
    }
}

/// Proxmox connection settings
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    pub hosts: Vec<String>,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub verify_tls: bool,
}

impl ProxmoxConfig {
    /// Load from `PROXMOX_*` environment variables
    pub fn from_env() -> Result<Self, NetworkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NetworkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| NetworkError::Configuration(format!("{} environment variable is required", key)))
        };

        let hosts: Vec<String> = required("PROXMOX_HOSTS")?
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        Ok(Self {
            hosts,
            user: required("PROXMOX_USER")?,
            token_name: required("PROXMOX_TOKEN_NAME")?,
            token_value: required("PROXMOX_TOKEN_VALUE")?,
            verify_tls: lookup("PROXMOX_VERIFY_TLS").is_some_and(|v| parse_bool(&v)),
        })
    }

    pub fn token(&self) -> ApiToken {
        ApiToken::new(&self.user, &self.token_name, &self.token_value)
    }
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>, NetworkError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| NetworkError::Configuration(format!("{}={:?} is invalid: {}", key, raw, e)))
        })
        .transpose()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "t" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SdnConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SdnConfig::default());
        assert_eq!(config.base_cidr.to_string(), "10.100.0.0/16");
        assert_eq!(config.subnet_count(), 256);
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides_and_empty_values() {
        let config = SdnConfig::from_lookup(lookup(&[
            ("SDN_ZONE", ""),
            ("SDN_BASE_CIDR", "10.0.0.0/24"),
            ("SDN_STUDENT_PREFIX", "26"),
            ("SDN_DHCP_START_OFFSET", "10"),
            ("SDN_DHCP_END_OFFSET", "60"),
            ("SDN_SUBNET_SNAT", "True"),
            ("SDN_VNET_FIREWALL_GROUP", "students"),
            ("SDN_APPLY_TIMEOUT", "5"),
        ]))
        .unwrap();
        assert_eq!(config.zone_name, "proxstar-sdn");
        assert_eq!(config.student_prefix, 26);
        assert_eq!(config.subnet_count(), 4);
        assert!(config.subnet_snat);
        assert_eq!(config.firewall_group.as_deref(), Some("students"));
        assert_eq!(config.apply_timeout, Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_number_is_configuration_error() {
        let result = SdnConfig::from_lookup(lookup(&[("SDN_STUDENT_PREFIX", "twenty")]));
        assert!(matches!(result, Err(NetworkError::Configuration(_))));

        let result = SdnConfig::from_lookup(lookup(&[("SDN_BASE_CIDR", "10.0.0.0/40")]));
        assert!(matches!(result, Err(NetworkError::Configuration(_))));
    }

    #[test]
    fn test_vlan_zone_requires_bridge() {
        let config = SdnConfig {
            zone_type: "vlan".to_string(),
            ..SdnConfig::default()
        };
        assert!(matches!(config.validate(), Err(NetworkError::Configuration(_))));

        let bridged = SdnConfig {
            zone_type: "vlan".to_string(),
            zone_bridge: Some("vmbr1".to_string()),
            ..SdnConfig::default()
        };
        bridged.validate().unwrap();
    }

    #[test]
    fn test_prefix_and_dhcp_bounds() {
        let too_wide = SdnConfig {
            student_prefix: 12,
            ..SdnConfig::default()
        };
        assert!(too_wide.validate().is_err());

        let dhcp_past_broadcast = SdnConfig {
            dhcp_end_offset: 255,
            ..SdnConfig::default()
        };
        assert!(dhcp_past_broadcast.validate().is_err());

        let zero_attempts = SdnConfig {
            allocate_attempts: 0,
            ..SdnConfig::default()
        };
        assert!(zero_attempts.validate().is_err());
    }

    #[test]
    fn test_vnet_name_room_checked_against_subnet_count() {
        // 65536 subnets cannot be named with a single base-36 digit
        let config = SdnConfig {
            vnet_id_prefix: "student".to_string(),
            vnet_max_len: 8,
            base_cidr: "10.0.0.0/8".parse().unwrap(),
            student_prefix: 24,
            ..SdnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vnet_name_room_includes_burned_ids() {
        // 32 subnets fit in 35 names only if no id is ever burned by a retry
        let config = SdnConfig {
            vnet_id_prefix: "student".to_string(),
            vnet_max_len: 8,
            base_cidr: "10.0.0.0/19".parse().unwrap(),
            student_prefix: 24,
            ..SdnConfig::default()
        };
        assert_eq!(config.subnet_count(), 32);
        assert!(matches!(config.validate(), Err(NetworkError::Configuration(_))));

        let single_attempt = SdnConfig {
            allocate_attempts: 1,
            ..config
        };
        single_attempt.validate().unwrap();
    }

    #[test]
    fn test_proxmox_config() {
        let config = ProxmoxConfig::from_lookup(lookup(&[
            ("PROXMOX_HOSTS", "pve1.example.com, pve2.example.com,"),
            ("PROXMOX_USER", "proxstar@pve"),
            ("PROXMOX_TOKEN_NAME", "sdn"),
            ("PROXMOX_TOKEN_VALUE", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.hosts, vec!["pve1.example.com", "pve2.example.com"]);
        assert!(!config.verify_tls);
        assert_eq!(config.token().header_value(), "PVEAPIToken=proxstar@pve!sdn=secret");

        let missing = ProxmoxConfig::from_lookup(lookup(&[("PROXMOX_HOSTS", "pve1")]));
        assert!(matches!(missing, Err(NetworkError::Configuration(_))));
    }

    #[test]
    fn test_vnet_alias() {
        assert_eq!(SdnConfig::default().vnet_alias("alice"), "Proxstar alice");
    }
}
