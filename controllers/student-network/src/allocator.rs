//! Student subnet allocation.
//!
//! Splits the base block into consecutive subnets of the student prefix
//! length and picks the first one that is neither assigned nor reserved.
//! Pure and deterministic: the same inputs always yield the same block.

use crate::error::NetworkError;
use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::debug;

/// Blocks of `prefix_len` in `base`, in ascending address order
pub fn subnet_blocks(base: Ipv4Network, prefix_len: u8) -> Result<impl Iterator<Item = Ipv4Network>, NetworkError> {
    if prefix_len < base.prefix() || prefix_len > 32 {
        return Err(NetworkError::Configuration(format!(
            "cannot split {} into /{} subnets",
            base, prefix_len
        )));
    }
    let start = u64::from(u32::from(base.network()));
    let step = 1u64 << (32 - u32::from(prefix_len));
    let count = 1u64 << u32::from(prefix_len - base.prefix());

    Ok((0..count).filter_map(move |i| {
        let address = u32::try_from(start + i * step).ok()?;
        Ipv4Network::new(Ipv4Addr::from(address), prefix_len).ok()
    }))
}

/// First block of `base` not overlapping anything in `assigned` or `reserved`
///
/// Entries that are not valid IPv4 CIDRs are ignored.
pub fn allocate_subnet(
    base: Ipv4Network,
    prefix_len: u8,
    assigned: &HashSet<String>,
    reserved: &HashSet<String>,
) -> Result<Ipv4Network, NetworkError> {
    let taken: Vec<Ipv4Network> = assigned
        .iter()
        .chain(reserved.iter())
        .filter_map(|cidr| cidr.parse::<Ipv4Network>().ok())
        .collect();

    for candidate in subnet_blocks(base, prefix_len)? {
        if taken.iter().any(|t| overlaps(*t, candidate)) {
            continue;
        }
        debug!("Allocated candidate subnet {} from {}", candidate, base);
        return Ok(candidate);
    }

    Err(NetworkError::SubnetSpaceExhausted(base.to_string()))
}

/// Whether two networks share any address
pub fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Gateway (first host) of a subnet
pub fn gateway_address(subnet: Ipv4Network) -> Ipv4Addr {
    offset_address(subnet, 1)
}

/// Address at `offset` from the network address
pub fn offset_address(subnet: Ipv4Network, offset: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet.network()).wrapping_add(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_available_block() {
        let subnet = allocate_subnet(net("10.0.0.0/24"), 26, &set(&["10.0.0.0/26"]), &HashSet::new()).unwrap();
        assert_eq!(subnet.to_string(), "10.0.0.64/26");
    }

    #[test]
    fn test_exhausted() {
        let assigned = set(&["10.0.0.0/26", "10.0.0.64/26", "10.0.0.128/26", "10.0.0.192/26"]);
        let result = allocate_subnet(net("10.0.0.0/24"), 26, &assigned, &HashSet::new());
        assert!(matches!(result, Err(NetworkError::SubnetSpaceExhausted(base)) if base == "10.0.0.0/24"));
    }

    #[test]
    fn test_reserved_is_skipped() {
        let subnet = allocate_subnet(
            net("10.0.0.0/24"),
            26,
            &set(&["10.0.0.0/26"]),
            &set(&["10.0.0.64/26"]),
        )
        .unwrap();
        assert_eq!(subnet.to_string(), "10.0.0.128/26");
    }

    #[test]
    fn test_deterministic() {
        let assigned = set(&["10.100.0.0/24", "10.100.2.0/24"]);
        let reserved = set(&["10.100.1.0/24"]);
        let first = allocate_subnet(net("10.100.0.0/16"), 24, &assigned, &reserved).unwrap();
        for _ in 0..10 {
            assert_eq!(allocate_subnet(net("10.100.0.0/16"), 24, &assigned, &reserved).unwrap(), first);
        }
        assert_eq!(first.to_string(), "10.100.3.0/24");
    }

    #[test]
    fn test_overlapping_controller_subnet_blocks_candidates() {
        // a wider subnet created out-of-band covers the first two /26 blocks
        let subnet = allocate_subnet(net("10.0.0.0/24"), 26, &set(&["10.0.0.0/25"]), &HashSet::new()).unwrap();
        assert_eq!(subnet.to_string(), "10.0.0.128/26");
    }

    #[test]
    fn test_unparseable_entries_ignored() {
        let subnet = allocate_subnet(net("10.0.0.0/24"), 26, &set(&["garbage", ""]), &HashSet::new()).unwrap();
        assert_eq!(subnet.to_string(), "10.0.0.0/26");
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(subnet_blocks(net("10.0.0.0/24"), 16).is_err());
        assert!(subnet_blocks(net("10.0.0.0/24"), 33).is_err());
    }

    #[test]
    fn test_blocks_use_network_address_of_base() {
        let blocks: Vec<String> = subnet_blocks(net("10.0.0.77/24"), 25).unwrap().map(|n| n.to_string()).collect();
        assert_eq!(blocks, vec!["10.0.0.0/25", "10.0.0.128/25"]);
    }

    #[test]
    fn test_gateway_and_offsets() {
        let subnet = net("10.100.7.0/24");
        assert_eq!(gateway_address(subnet), Ipv4Addr::new(10, 100, 7, 1));
        assert_eq!(offset_address(subnet, 50), Ipv4Addr::new(10, 100, 7, 50));
        assert_eq!(offset_address(subnet, 200), Ipv4Addr::new(10, 100, 7, 200));
    }
}
