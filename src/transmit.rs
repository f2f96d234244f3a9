//! The single external transmit interface every protocol module hands
//! finished packets to (§6's `ip_packet_send`).
//!
//! Split out from the IGMP module so TCP can share the exact same contract
//! rather than each protocol inventing its own send call.

use crate::ip::Ipv4Address;
use crate::pb::{PacketBuffer, PacketPool};

/// Precedence at which a packet is handed to the transmit path. Only the
/// "normal" level appears in this crate's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    Normal,
}

/// Fragmentation policy for a transmitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPolicy {
    Allowed,
    DontFragment,
}

/// The IP transmit call. Takes ownership of `pb` -- once passed in, the
/// caller cannot touch it again, which Rust's move semantics enforce
/// directly rather than by convention.
pub trait PacketTransmit {
    fn ip_packet_send(
        &mut self,
        pool: &mut PacketPool,
        pb: PacketBuffer,
        destination: Ipv4Address,
        precedence: Precedence,
        ttl: u8,
        protocol: u8,
        fragment_policy: FragmentPolicy,
    );
}
