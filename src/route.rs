//! Route resolution: given a destination, find the outgoing interface and
//! next-hop address (§4.3).
//!
//! The teacher's `net.rs`/`arp.rs` resolve neighbours with ARP once an
//! outgoing interface is already known; ARP/neighbour resolution is an
//! explicit non-goal here (§1), so this module stops one layer up, at
//! choosing *which* interface and *which* IP next hop a packet should be
//! handed to.

use crate::error::Status;
use crate::ip::{Interface, InterfaceIndex, IpState, Ipv4Address};

/// `true` if `addr` falls in the class D multicast range 224.0.0.0/4.
pub fn is_multicast(addr: Ipv4Address) -> bool {
    (addr[0] & 0xF0) == 0xE0
}

/// Resolve `dst` to an outgoing interface and next-hop address.
///
/// Multicast destinations bypass subnet/gateway logic entirely: the next
/// hop is the destination itself, and the first configured interface is
/// used to transmit (an embedder with multiple multicast-capable
/// interfaces should call the per-interface IGMP/transmit APIs directly
/// rather than going through general route resolution).
///
/// For unicast destinations: if `dst` lies on an interface's attached
/// subnet, that interface is used and the next hop is `dst` itself.
/// Otherwise the first interface with a configured gateway is used, and the
/// next hop is that gateway.
pub fn route_find(state: &IpState, dst: Ipv4Address) -> Result<(InterfaceIndex, Ipv4Address), Status> {
    if is_multicast(dst) {
        if state.interfaces.is_empty() {
            return Err(Status::AddressUnreachable);
        }
        return Ok((0, dst));
    }

    for (index, iface) in state.interfaces.iter().enumerate() {
        if same_subnet(iface, dst) {
            return Ok((index, dst));
        }
    }

    for (index, iface) in state.interfaces.iter().enumerate() {
        if let Some(gateway) = iface.gateway {
            return Ok((index, gateway));
        }
    }

    Err(Status::AddressUnreachable)
}

fn same_subnet(iface: &Interface, addr: Ipv4Address) -> bool {
    (0..4).all(|i| iface.ip_address[i] & iface.netmask[i] == addr[i] & iface.netmask[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{IgmpRouterVersion, IpInstance};

    fn two_interface_instance() -> IpInstance {
        let eth0 = Interface::new([192, 168, 1, 10], [255, 255, 255, 0], 1500, [0; 6])
            .with_gateway([192, 168, 1, 1]);
        let eth1 = Interface::new([10, 0, 0, 5], [255, 0, 0, 0], 1500, [1; 6]);
        IpInstance::new(alloc::vec![eth0, eth1], 4, IgmpRouterVersion::V2)
    }

    #[test]
    fn direct_subnet_routes_to_destination() {
        let ip = two_interface_instance();
        let state = ip.lock();
        let (iface, hop) = route_find(&state, [192, 168, 1, 200]).unwrap();
        assert_eq!(iface, 0);
        assert_eq!(hop, [192, 168, 1, 200]);
    }

    #[test]
    fn off_subnet_routes_via_gateway() {
        let ip = two_interface_instance();
        let state = ip.lock();
        let (iface, hop) = route_find(&state, [8, 8, 8, 8]).unwrap();
        assert_eq!(iface, 0);
        assert_eq!(hop, [192, 168, 1, 1]);
    }

    #[test]
    fn multicast_next_hop_is_destination() {
        let ip = two_interface_instance();
        let state = ip.lock();
        let (_, hop) = route_find(&state, [224, 0, 0, 42]).unwrap();
        assert_eq!(hop, [224, 0, 0, 42]);
    }

    #[test]
    fn unreachable_destination_with_no_gateway() {
        let eth0 = Interface::new([192, 168, 1, 10], [255, 255, 255, 0], 1500, [0; 6]);
        let ip = IpInstance::new(alloc::vec![eth0], 4, IgmpRouterVersion::V2);
        let state = ip.lock();
        assert_eq!(route_find(&state, [8, 8, 8, 8]).unwrap_err(), Status::AddressUnreachable);
    }
}
