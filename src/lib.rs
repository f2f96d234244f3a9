//! Protocol state machines and per-socket control logic for an embedded
//! TCP/IP stack core: IGMP host membership reports, TCP client-side active
//! open, and UDP port binding, plus the packet pool, IP instance lock, route
//! resolution, and cooperative suspension primitive they all share.
//!
//! `no_std` with `alloc`: this crate owns protocol logic only. Link/device
//! drivers, ARP/neighbour discovery, and the actual transmit path are an
//! embedder's responsibility, reached through the [`transmit::PacketTransmit`]
//! and [`suspend::HostThreads`] traits.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod igmp;
pub mod ip;
pub mod pb;
pub mod rng;
pub mod route;
pub mod suspend;
pub mod tcp;
pub mod transmit;
pub mod udp;

pub use error::Status;
pub use ip::{IgmpRouterVersion, InterfaceIndex, Interface, IpInstance, IpState, Ipv4Address};

/// One-time `env_logger` setup shared by this crate's own tests, in the
/// style of the corpus's `INIT.call_once` guard around `env_logger::builder()`
/// (e.g. `wasmer`'s test runners) -- every test calls this instead of each
/// wiring up its own `Once`.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Trace).try_init();
    });
}
