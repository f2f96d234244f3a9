//! IP instance: the process-wide container every protocol operation locks.
//!
//! Grounded on `netstack/mod.rs`'s `NET_STATE: Mutex<Option<NetState>>` plus
//! `with_net_state`: one `spin::Mutex` guards everything the protocols
//! touch, and the packet pool lives inside the same guard rather than
//! behind a lock of its own, since §4.2 requires allocation to be
//! serialized with table and socket mutation.
//!
//! Unlike `with_net_state`, operations here need to release the lock mid-call
//! to suspend (§4.2), so the lock is exposed as an explicit `lock()` /
//! `MutexGuard` rather than a closure -- a suspending operation takes the
//! guard, does its work, then `drop`s it before calling into [`crate::suspend`].

use alloc::vec::Vec;

use crate::pb::PacketPool;
use crate::suspend::ThreadId;
use crate::tcp::TcpSocket;
use crate::udp::UdpTable;

/// Index into [`IpState::interfaces`]. Stable for the lifetime of the IP
/// instance -- interfaces are never added or removed after boot.
pub type InterfaceIndex = usize;

/// An IPv4 address in network-order byte form.
pub type Ipv4Address = [u8; 4];

/// A network interface. Mutated only while the IP instance's lock is held.
#[derive(Debug, Clone)]
pub struct Interface {
    pub mtu: u16,
    pub link_address: [u8; 6],
    pub ip_address: Ipv4Address,
    pub netmask: Ipv4Address,
    /// Gateway used when the destination is not on this interface's subnet.
    pub gateway: Option<Ipv4Address>,
    /// Multicast groups this interface has joined.
    pub multicast_joins: Vec<Ipv4Address>,
}

impl Interface {
    pub fn new(ip_address: Ipv4Address, netmask: Ipv4Address, mtu: u16, link_address: [u8; 6]) -> Self {
        Interface {
            mtu,
            link_address,
            ip_address,
            netmask,
            gateway: None,
            multicast_joins: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, gateway: Ipv4Address) -> Self {
        self.gateway = Some(gateway);
        self
    }

    fn same_subnet(&self, addr: Ipv4Address) -> bool {
        (0..4).all(|i| self.ip_address[i] & self.netmask[i] == addr[i] & self.netmask[i])
    }
}

/// Which IGMP dialect the upstream router speaks. Governs both the report
/// type byte §4.4 emits and whether LEAVE reports are ever sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgmpRouterVersion {
    V1,
    V2,
}

/// Runtime equivalents of the compile-time toggles in §6. The crate's
/// `disable-igmpv2`/`disable-igmp-info`/`disable-tcp-info` Cargo features
/// set the matching default at construction; this struct lets an embedder
/// override them at runtime instead.
#[derive(Debug, Clone, Copy)]
pub struct ConfigToggles {
    pub disable_igmpv2: bool,
    pub disable_igmp_info: bool,
    pub disable_tcp_info: bool,
}

impl Default for ConfigToggles {
    fn default() -> Self {
        ConfigToggles {
            disable_igmpv2: cfg!(feature = "disable-igmpv2"),
            disable_igmp_info: cfg!(feature = "disable-igmp-info"),
            disable_tcp_info: cfg!(feature = "disable-tcp-info"),
        }
    }
}

/// Counters incremented only under the IP lock; readers outside the lock
/// may observe torn values and must tolerate it (§5).
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub igmp_reports_sent: u64,
    pub tcp_active_connections: u64,
    pub tcp_connections: u64,
}

/// Everything the IP lock protects: interfaces, protocol tables, counters,
/// and the packet pool itself.
pub struct IpState {
    pub pool: PacketPool,
    pub interfaces: Vec<Interface>,
    pub igmp_router_version: IgmpRouterVersion,
    pub config: ConfigToggles,
    pub counters: Counters,
    pub udp: UdpTable,
    pub tcp_sockets: Vec<Option<TcpSocket>>,
    /// The IP instance's own internal processing thread, if the embedder
    /// has one. `tcp::connect` must never suspend this thread even when the
    /// caller asks it to wait, since blocking it would stall the stack
    /// itself; see `tcp.rs` for the resulting `Status::InProgress` override.
    pub housekeeping_thread: Option<ThreadId>,
    next_thread_id: u64,
}

impl IpState {
    pub fn interface(&self, index: InterfaceIndex) -> Option<&Interface> {
        self.interfaces.get(index)
    }

    pub fn interface_mut(&mut self, index: InterfaceIndex) -> Option<&mut Interface> {
        self.interfaces.get_mut(index)
    }

    /// Hand out a fresh, process-unique thread identifier for callers that
    /// have no thread system of their own (mainly test harnesses).
    pub fn fresh_thread_id(&mut self) -> u64 {
        self.next_thread_id += 1;
        self.next_thread_id
    }
}

/// The process-wide IP instance. Created at boot, never torn down while
/// sockets may still reference it (§3).
pub struct IpInstance {
    inner: spin::Mutex<IpState>,
}

impl IpInstance {
    pub fn new(interfaces: Vec<Interface>, pool_capacity: usize, igmp_router_version: IgmpRouterVersion) -> Self {
        IpInstance {
            inner: spin::Mutex::new(IpState {
                pool: PacketPool::new(pool_capacity),
                interfaces,
                igmp_router_version,
                config: ConfigToggles::default(),
                counters: Counters::default(),
                udp: UdpTable::new(),
                tcp_sockets: Vec::new(),
                housekeeping_thread: None,
                next_thread_id: 0,
            }),
        }
    }

    /// Acquire the IP instance's single protection lock. Every protocol
    /// operation begins with this call and ends when the returned guard is
    /// dropped (§4.2); a suspending operation drops it explicitly before
    /// blocking.
    pub fn lock(&self) -> spin::MutexGuard<'_, IpState> {
        self.inner.lock()
    }

    /// Mark `thread` as the IP instance's own internal processing thread.
    /// A production embedder calls this once, from that thread, during
    /// boot; `tcp::connect` consults it to avoid ever suspending that
    /// thread on its own wait list.
    pub fn set_housekeeping_thread(&self, thread: ThreadId) {
        self.inner.lock().housekeeping_thread = Some(thread);
    }
}
