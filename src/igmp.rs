//! IGMP host membership reports (§4.4).
//!
//! The teacher kernel never speaks IGMP; this module is grounded instead on
//! `original_source/.../nx_igmp_interface_report_send.c` for exact field
//! layout and checksum order, with the one's-complement fold style carried
//! over from `netstack.rs::calculate_checksum` (fold, then fold again to
//! absorb the carry of the carry).

use crate::error::Status;
use crate::ip::{IgmpRouterVersion, InterfaceIndex, IpInstance, Ipv4Address};
use crate::pb::{PacketBuffer, PacketPool};
use crate::transmit::{FragmentPolicy, PacketTransmit, Precedence};

/// On-the-wire IGMP header size: type/version, max response time, checksum,
/// group address.
pub const HEADER_SIZE: usize = 8;

pub const IP_PROTO_IGMP: u8 = 2;
const IGMP_TTL: u8 = 1;

const TYPE_V1_HOST_REPORT: u8 = 0x12;
const TYPE_V2_JOIN: u8 = 0x16;
const TYPE_V2_LEAVE: u8 = 0x17;

/// RFC 2236 §3: all-routers multicast address LEAVE reports are sent to.
pub const ALL_ROUTERS_ADDRESS: Ipv4Address = [224, 0, 0, 2];

/// Fold a 32-bit accumulator down to 16 bits, carrying overflow back in.
/// Two passes because the first fold can itself carry out of bit 16 (§9).
fn fold_checksum(mut sum: u32) -> u16 {
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum as u16
}

/// Build and transmit an IGMP host membership report (§4.4).
///
/// `is_joining == false` must only be requested for an IGMPv2 (or later)
/// peer; an IGMPv1 host never emits LEAVE. That gate is the caller's
/// contract (§9) -- this function does not enforce it, matching the
/// original's unconditional acceptance of the flag.
pub fn report_send(
    ip: &IpInstance,
    transmit: &mut dyn PacketTransmit,
    group: Ipv4Address,
    interface_index: InterfaceIndex,
    is_joining: bool,
) -> Status {
    let mut state = ip.lock();

    let mut pb = match state.pool.allocate(HEADER_SIZE, 0) {
        Ok(pb) => pb,
        Err(status) => {
            log::debug!("igmp report_send: packet pool exhausted on interface {}", interface_index);
            return status;
        }
    };
    pb.interface = Some(interface_index);

    let use_v1 = matches!(state.igmp_router_version, IgmpRouterVersion::V1) || state.config.disable_igmpv2;

    if is_joining && !state.config.disable_igmp_info {
        state.counters.igmp_reports_sent += 1;
    }

    let mut word0: u32 = if use_v1 {
        (TYPE_V1_HOST_REPORT as u32) << 24
    } else if is_joining {
        (TYPE_V2_JOIN as u32) << 24
    } else {
        (TYPE_V2_LEAVE as u32) << 24
    };
    let word1: u32 = u32::from_be_bytes(group);

    let mut checksum_acc: u32 = (word0 >> 16) + (word0 & 0xFFFF);
    checksum_acc += (word1 >> 16) + (word1 & 0xFFFF);
    let checksum = fold_checksum(checksum_acc);
    word0 |= (!checksum as u32) & 0xFFFF;

    {
        let chunk = state.pool.chunk_mut(&pb);
        let region = match pb.prepend(chunk, HEADER_SIZE) {
            Ok(region) => region,
            Err(status) => {
                state.pool.release(pb);
                return status;
            }
        };
        region[0..4].copy_from_slice(&word0.to_be_bytes());
        region[4..8].copy_from_slice(&word1.to_be_bytes());
    }

    let destination = if is_joining { group } else { ALL_ROUTERS_ADDRESS };
    pb.next_hop = destination;

    log::trace!(
        "igmp report_send: {} group {:?} on interface {}",
        if is_joining { "join" } else { "leave" },
        group,
        interface_index
    );

    transmit.ip_packet_send(
        &mut state.pool,
        pb,
        destination,
        Precedence::Normal,
        IGMP_TTL,
        IP_PROTO_IGMP,
        FragmentPolicy::Allowed,
    );

    Status::Success
}

/// Join `group` on `interface_index`: record it in that interface's
/// membership list (§3's "list of joined multicast groups") and send the
/// initial report. Joining a group already on the list is a no-op that
/// still reports `Success` without re-sending -- the membership is already
/// established.
pub fn join_group(
    ip: &IpInstance,
    transmit: &mut dyn PacketTransmit,
    group: Ipv4Address,
    interface_index: InterfaceIndex,
) -> Status {
    {
        let mut state = ip.lock();
        let Some(iface) = state.interface_mut(interface_index) else {
            return Status::EntryNotFound;
        };
        if iface.multicast_joins.contains(&group) {
            return Status::Success;
        }
        iface.multicast_joins.push(group);
    }
    report_send(ip, transmit, group, interface_index, true)
}

/// Leave `group` on `interface_index`: drop it from that interface's
/// membership list and, per the IGMPv1 LEAVE gate (§9), send a LEAVE report
/// only when the configured peer speaks v2 -- an IGMPv1 peer never sees a
/// LEAVE at all. Returns `Status::EntryNotFound` if `group` was never
/// joined on this interface, the one case `report_send` itself has no way
/// to detect since it is handed a group directly rather than consulting
/// the join table.
pub fn leave_group(
    ip: &IpInstance,
    transmit: &mut dyn PacketTransmit,
    group: Ipv4Address,
    interface_index: InterfaceIndex,
) -> Status {
    let send_leave = {
        let mut state = ip.lock();
        let version = state.igmp_router_version;
        let disable_v2 = state.config.disable_igmpv2;
        let Some(iface) = state.interface_mut(interface_index) else {
            return Status::EntryNotFound;
        };
        let Some(pos) = iface.multicast_joins.iter().position(|g| *g == group) else {
            return Status::EntryNotFound;
        };
        iface.multicast_joins.remove(pos);
        matches!(version, IgmpRouterVersion::V2) && !disable_v2
    };
    if send_leave {
        report_send(ip, transmit, group, interface_index, false)
    } else {
        Status::Success
    }
}

/// `true` if the 16-bit one's-complement sum over `header` (checksum field
/// included) equals `0xFFFF`, the standard self-check for a correctly
/// checksummed header (§8).
pub fn checksum_is_valid(header: &[u8; HEADER_SIZE]) -> bool {
    let word0 = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let word1 = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let mut acc: u32 = (word0 >> 16) + (word0 & 0xFFFF);
    acc += (word1 >> 16) + (word1 & 0xFFFF);
    fold_checksum(acc) == 0xFFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{IgmpRouterVersion, Interface, IpInstance};

    struct RecordingTransmit {
        sent: Option<(alloc::vec::Vec<u8>, Ipv4Address, u8, u8)>,
    }

    impl PacketTransmit for RecordingTransmit {
        fn ip_packet_send(
            &mut self,
            pool: &mut PacketPool,
            pb: PacketBuffer,
            destination: Ipv4Address,
            _precedence: Precedence,
            ttl: u8,
            protocol: u8,
            _fragment_policy: FragmentPolicy,
        ) {
            let bytes = pb.data(pool.chunk(&pb)).to_vec();
            self.sent = Some((bytes, destination, ttl, protocol));
            pool.release(pb);
        }
    }

    fn instance(version: IgmpRouterVersion) -> IpInstance {
        let eth0 = Interface::new([192, 168, 1, 10], [255, 255, 255, 0], 1500, [0; 6]);
        IpInstance::new(alloc::vec![eth0], 4, version)
    }

    #[test]
    fn igmpv2_join_report() {
        crate::init_test_logging();
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        let status = report_send(&ip, &mut tx, [224, 0, 0, 42], 0, true);
        assert_eq!(status, Status::Success);
        let (bytes, dest, ttl, proto) = tx.sent.unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..2], &[0x16, 0x00]);
        assert_eq!(&bytes[4..8], &[0xE0, 0x00, 0x00, 0x2A]);
        assert_eq!(dest, [224, 0, 0, 42]);
        assert_eq!(ttl, 1);
        assert_eq!(proto, IP_PROTO_IGMP);
        assert!(checksum_is_valid(&bytes[0..8].try_into().unwrap()));
        assert_eq!(ip.lock().counters.igmp_reports_sent, 1);
    }

    #[test]
    fn igmpv1_peer_always_reports_type_0x12() {
        let ip = instance(IgmpRouterVersion::V1);
        let mut tx = RecordingTransmit { sent: None };
        report_send(&ip, &mut tx, [224, 0, 0, 42], 0, true);
        let (bytes, _, _, _) = tx.sent.unwrap();
        assert_eq!(&bytes[0..2], &[0x12, 0x00]);
    }

    #[test]
    fn igmpv2_leave_report_targets_all_routers() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        let status = report_send(&ip, &mut tx, [224, 0, 0, 42], 0, false);
        assert_eq!(status, Status::Success);
        let (bytes, dest, _, _) = tx.sent.unwrap();
        assert_eq!(&bytes[0..2], &[0x17, 0x00]);
        assert_eq!(dest, ALL_ROUTERS_ADDRESS);
        // Leave reports never touch the join counter.
        assert_eq!(ip.lock().counters.igmp_reports_sent, 0);
    }

    #[test]
    fn allocation_failure_leaves_no_side_effects() {
        let ip = instance(IgmpRouterVersion::V2);
        // Drain the pool so allocation fails.
        let mut held = alloc::vec::Vec::new();
        loop {
            match ip.lock().pool.allocate(HEADER_SIZE, 0) {
                Ok(pb) => held.push(pb),
                Err(_) => break,
            }
        }
        let mut tx = RecordingTransmit { sent: None };
        let status = report_send(&ip, &mut tx, [224, 0, 0, 42], 0, true);
        assert_eq!(status, Status::NoPacket);
        assert!(tx.sent.is_none());
        assert_eq!(ip.lock().counters.igmp_reports_sent, 0);
    }

    #[test]
    fn join_group_records_membership_and_sends_report() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        let status = join_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        assert_eq!(status, Status::Success);
        assert!(tx.sent.is_some());
        assert_eq!(ip.lock().interfaces[0].multicast_joins, alloc::vec![[224, 0, 0, 42]]);
    }

    #[test]
    fn rejoining_the_same_group_is_a_no_op_that_does_not_resend() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        assert_eq!(join_group(&ip, &mut tx, [224, 0, 0, 42], 0), Status::Success);
        tx.sent = None;
        let status = join_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        assert_eq!(status, Status::Success);
        assert!(tx.sent.is_none());
        assert_eq!(ip.lock().interfaces[0].multicast_joins.len(), 1);
    }

    #[test]
    fn leave_group_v2_peer_sends_leave_and_drops_membership() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        join_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        let status = leave_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        assert_eq!(status, Status::Success);
        let (bytes, dest, _, _) = tx.sent.unwrap();
        assert_eq!(&bytes[0..2], &[0x17, 0x00]);
        assert_eq!(dest, ALL_ROUTERS_ADDRESS);
        assert!(ip.lock().interfaces[0].multicast_joins.is_empty());
    }

    #[test]
    fn leave_group_v1_peer_drops_membership_without_sending() {
        let ip = instance(IgmpRouterVersion::V1);
        let mut tx = RecordingTransmit { sent: None };
        join_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        tx.sent = None;
        let status = leave_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        assert_eq!(status, Status::Success);
        assert!(tx.sent.is_none());
        assert!(ip.lock().interfaces[0].multicast_joins.is_empty());
    }

    #[test]
    fn leave_group_not_joined_reports_entry_not_found() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        let status = leave_group(&ip, &mut tx, [224, 0, 0, 42], 0);
        assert_eq!(status, Status::EntryNotFound);
        assert!(tx.sent.is_none());
    }

    #[test]
    fn join_group_unknown_interface_reports_entry_not_found() {
        let ip = instance(IgmpRouterVersion::V2);
        let mut tx = RecordingTransmit { sent: None };
        assert_eq!(join_group(&ip, &mut tx, [224, 0, 0, 42], 7), Status::EntryNotFound);
    }
}
