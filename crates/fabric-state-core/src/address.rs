//! IPv6 addressing of nodes within a fabric.
//!
//! A fabric address is a unique local address: `fd` followed by the low 40
//! bits of the fabric id, a 16-bit subnet, and an interface id derived from
//! the node id by flipping the universal/local bit.

use std::net::Ipv6Addr;

use crate::types::{FabricId, NodeId};

const ULA_PREFIX: u8 = 0xfd;
const UNIVERSAL_LOCAL_BIT: u64 = 0x0200_0000_0000_0000;

/// Default subnet for node addresses (primary WiFi).
pub const DEFAULT_SUBNET: u16 = 1;

pub fn node_id_to_interface_id(node: NodeId) -> u64 {
    node.0 ^ UNIVERSAL_LOCAL_BIT
}

pub fn interface_id_to_node_id(interface_id: u64) -> NodeId {
    NodeId(interface_id ^ UNIVERSAL_LOCAL_BIT)
}

/// Build a ULA from a 40-bit global id, subnet and interface id.
pub fn make_ula(global_id: u64, subnet: u16, interface_id: u64) -> Ipv6Addr {
    let mut bytes = [0u8; 16];
    bytes[0] = ULA_PREFIX;
    bytes[1..6].copy_from_slice(&global_id.to_be_bytes()[3..]);
    bytes[6..8].copy_from_slice(&subnet.to_be_bytes());
    bytes[8..].copy_from_slice(&interface_id.to_be_bytes());
    Ipv6Addr::from(bytes)
}

pub fn is_ula(addr: &Ipv6Addr) -> bool {
    addr.octets()[0] == ULA_PREFIX
}

/// 40-bit global id of a ULA.
pub fn global_id(addr: &Ipv6Addr) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[3..].copy_from_slice(&addr.octets()[1..6]);
    u64::from_be_bytes(bytes)
}

pub fn interface_id(addr: &Ipv6Addr) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&addr.octets()[8..]);
    u64::from_be_bytes(bytes)
}

/// Address of `node` in `fabric`; the broadcast node maps to link-local all-nodes.
pub fn select_node_address(fabric: FabricId, node: NodeId, subnet: u16) -> Ipv6Addr {
    if node == NodeId::ANY {
        return Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
    }
    make_ula(fabric.ipv6_global_id(), subnet, node_id_to_interface_id(node))
}

/// True if `addr` is a ULA belonging to `fabric`.
pub fn is_fabric_address(fabric: FabricId, addr: &Ipv6Addr) -> bool {
    fabric.is_specified() && is_ula(addr) && global_id(addr) == fabric.ipv6_global_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_node_address() {
        let fabric = FabricId(0x1234_5678_9ABC_DEF0);
        let addr = select_node_address(fabric, NodeId(0x18B4_3000_0000_0042), 6);
        assert_eq!(addr, "fd78:9abc:def0:6:1ab4:3000:0:42".parse::<Ipv6Addr>().unwrap());
        assert!(is_fabric_address(fabric, &addr));
        assert_eq!(interface_id_to_node_id(interface_id(&addr)), NodeId(0x18B4_3000_0000_0042));
    }

    #[test]
    fn test_any_node_is_all_nodes_multicast() {
        let addr = select_node_address(FabricId(1), NodeId::ANY, DEFAULT_SUBNET);
        assert_eq!(addr, "ff02::1".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_not_fabric_address() {
        let fabric = FabricId(0x1234_5678_9ABC_DEF0);
        let other = make_ula(0x11_2233_4455, 1, 1);
        assert!(!is_fabric_address(fabric, &other));
        assert!(!is_fabric_address(FabricId::NOT_SPECIFIED, &other));
        assert!(!is_fabric_address(fabric, &"2001:db8::1".parse::<Ipv6Addr>().unwrap()));
    }
}
