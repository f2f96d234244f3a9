//! UDP port table and socket bind (§4.5).
//!
//! Grounded on `original_source/.../nx_udp_socket_bind.c`: a port is looked
//! up by hashing into a fixed bucket array, a collision either fails
//! outright (`wait == 0`) or suspends the caller on that specific port's
//! wait list, and an `unbind`/`close` that frees a port wakes exactly one
//! waiter, which resumes inside its own `bind()` call and finishes the job
//! itself rather than being handed the port by the waker. The teacher's
//! `netstack/udp.rs::udp_bind` is the Rust-side analogue for the rest of the
//! socket's shape (`local_port`, `close`), though it has no collision
//! handling of its own to borrow from -- sockets there just claim a port
//! unconditionally.
//!
//! The bucket array itself is a `Vec<Vec<usize>>` rather than an intrusive
//! circular list (§9's arena-of-stable-indices guidance): each bucket holds
//! the arena indices of every bound socket that hashes there, and a bind
//! walks the bucket to find an actual port collision.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::Status;
use crate::ip::IpInstance;
use crate::rng::random_u16;
use crate::suspend::{HostThreads, WaitQueue};

/// Requests an ephemeral port instead of a specific one.
pub const ANY_PORT: u16 = 0;

const BUCKET_COUNT: usize = 32;
const EPHEMERAL_START: u16 = 0xC000;

/// `(port + (port >> 8)) & (BUCKET_COUNT - 1)`: the bucket a port hashes to.
pub fn bucket_index(port: u16) -> usize {
    ((port as usize) + ((port as usize) >> 8)) & (BUCKET_COUNT - 1)
}

/// A UDP endpoint. Created empty and unbound; `bind` assigns it a port.
#[derive(Debug, Default)]
pub struct UdpSocket {
    pub port: u16,
    pub bound: bool,
    bind_in_progress: bool,
}

/// The port table: socket arena, hash buckets over bound ports, and one
/// wait list per port currently being contended.
pub struct UdpTable {
    buckets: Vec<Vec<usize>>,
    sockets: Vec<Option<UdpSocket>>,
    port_waiters: BTreeMap<u16, WaitQueue>,
    /// Advances on every ephemeral bind attempt so repeated calls with a
    /// stalled hardware RNG still draw different fallback starts.
    ephemeral_seed: u64,
}

impl UdpTable {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(Vec::new());
        }
        UdpTable {
            buckets,
            sockets: Vec::new(),
            port_waiters: BTreeMap::new(),
            ephemeral_seed: 0,
        }
    }

    /// Create a fresh, unbound socket and return its arena index. Reuses a
    /// vacated slot before growing the arena.
    pub fn create(&mut self) -> usize {
        if let Some(index) = self.sockets.iter().position(|s| s.is_none()) {
            self.sockets[index] = Some(UdpSocket::default());
            return index;
        }
        self.sockets.push(Some(UdpSocket::default()));
        self.sockets.len() - 1
    }

    pub fn local_port(&self, socket: usize) -> Option<u16> {
        self.sockets.get(socket)?.as_ref().filter(|s| s.bound).map(|s| s.port)
    }

    /// Release a bound socket's port, if any, and wake one waiter contending
    /// for it.
    pub fn close(&mut self, socket: usize) {
        let Some(Some(sock)) = self.sockets.get_mut(socket) else { return };
        if sock.bound {
            let port = sock.port;
            sock.bound = false;
            let bucket = bucket_index(port);
            self.buckets[bucket].retain(|&idx| idx != socket);
            if let Some(waiters) = self.port_waiters.get_mut(&port) {
                waiters.notify_one(Status::Success);
                if waiters.is_empty() {
                    self.port_waiters.remove(&port);
                }
            }
        }
    }

    fn port_in_use(&self, port: u16, exclude: usize) -> bool {
        let bucket = bucket_index(port);
        self.buckets[bucket].iter().any(|&idx| {
            idx != exclude
                && self.sockets[idx]
                    .as_ref()
                    .map_or(false, |s| s.bound && s.port == port)
        })
    }

    fn claim(&mut self, socket: usize, port: u16) {
        let bucket = bucket_index(port);
        self.buckets[bucket].push(socket);
        if let Some(sock) = self.sockets[socket].as_mut() {
            sock.port = port;
            sock.bound = true;
            sock.bind_in_progress = false;
        }
    }

    /// Pick a random start in the ephemeral range and scan upward
    /// (wrapping) for the first unused port (§4.5 step 3).
    fn find_free_ephemeral(&mut self, socket: usize) -> Option<u16> {
        self.ephemeral_seed = self.ephemeral_seed.wrapping_add(1);
        let span = (u16::MAX - EPHEMERAL_START) as u32 + 1;
        let draw = random_u16(self.ephemeral_seed) as u32 % span;
        let mut candidate = EPHEMERAL_START.wrapping_add(draw as u16);

        for _ in 0..span {
            if !self.port_in_use(candidate, socket) {
                return Some(candidate);
            }
            candidate = if candidate == u16::MAX { EPHEMERAL_START } else { candidate + 1 };
        }
        None
    }
}

impl Default for UdpTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind `socket` to `port` (or an ephemeral port, if `port == ANY_PORT`).
///
/// `wait_ticks == 0` never suspends: a collision on a specific port fails
/// immediately with `Status::PortUnavailable`. `wait_ticks > 0` suspends the
/// caller on that port's wait list; when `close` elsewhere frees the port,
/// this call is woken and re-attempts the bind itself, exactly as if it had
/// just been invoked (another waiter could in principle win the race first,
/// so failure to claim the port here is not a bug -- it loops back around).
pub fn bind(ip: &IpInstance, threads: &mut dyn HostThreads, socket: usize, port: u16, wait_ticks: u32) -> Status {
    loop {
        let mut state = ip.lock();
        let sock = match state.udp.sockets.get(socket) {
            Some(Some(sock)) => sock,
            _ => return Status::EntryNotFound,
        };
        if sock.bound || sock.bind_in_progress {
            return Status::AlreadyBound;
        }

        if port == ANY_PORT {
            return match state.udp.find_free_ephemeral(socket) {
                Some(free_port) => {
                    state.udp.claim(socket, free_port);
                    Status::Success
                }
                None => Status::NoFreePorts,
            };
        }

        if !state.udp.port_in_use(port, socket) {
            state.udp.claim(socket, port);
            return Status::Success;
        }

        if wait_ticks == 0 {
            log::debug!("udp bind: port {} already in use, not waiting", port);
            return Status::PortUnavailable;
        }

        if let Some(sock) = state.udp.sockets[socket].as_mut() {
            sock.bind_in_progress = true;
        }
        let thread = threads.current();
        log::trace!("udp bind: socket {} suspending for port {}", socket, port);
        state.udp.port_waiters.entry(port).or_insert_with(WaitQueue::new).push(thread, wait_ticks);
        drop(state);

        threads.park(thread, wait_ticks);

        let mut state = ip.lock();
        let timed_out = state
            .udp
            .port_waiters
            .get_mut(&port)
            .and_then(|waiters| waiters.remove(thread, Status::Timeout));
        if let Some(sock) = state.udp.sockets[socket].as_mut() {
            sock.bind_in_progress = false;
        }
        if let Some(entry) = state.udp.port_waiters.get(&port) {
            if entry.is_empty() {
                state.udp.port_waiters.remove(&port);
            }
        }
        if timed_out.is_some() {
            log::debug!("udp bind: socket {} timed out waiting for port {}", socket, port);
            return Status::Timeout;
        }
        drop(state);
        // Woken by a close(): loop and retry the bind from scratch.
        log::trace!("udp bind: socket {} woken for port {}, retrying", socket, port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{IgmpRouterVersion, Interface, IpInstance};
    use crate::suspend::Cooperative;

    fn instance() -> IpInstance {
        let eth0 = Interface::new([192, 168, 1, 10], [255, 255, 255, 0], 1500, [0; 6]);
        IpInstance::new(alloc::vec![eth0], 4, IgmpRouterVersion::V2)
    }

    #[test]
    fn bind_specific_free_port_succeeds() {
        crate::init_test_logging();
        let ip = instance();
        let socket = ip.lock().udp.create();
        let mut threads = Cooperative::new(|_| {});
        let status = bind(&ip, &mut threads, socket, 7777, 0);
        assert_eq!(status, Status::Success);
        assert_eq!(ip.lock().udp.local_port(socket), Some(7777));
    }

    #[test]
    fn bind_any_port_assigns_ephemeral() {
        let ip = instance();
        let socket = ip.lock().udp.create();
        let mut threads = Cooperative::new(|_| {});
        let status = bind(&ip, &mut threads, socket, ANY_PORT, 0);
        assert_eq!(status, Status::Success);
        assert!(ip.lock().udp.local_port(socket).unwrap() >= EPHEMERAL_START);
    }

    #[test]
    fn collision_without_wait_fails_immediately() {
        let ip = instance();
        let a = ip.lock().udp.create();
        let b = ip.lock().udp.create();
        let mut threads = Cooperative::new(|_| {});
        assert_eq!(bind(&ip, &mut threads, a, 53, 0), Status::Success);
        assert_eq!(bind(&ip, &mut threads, b, 53, 0), Status::PortUnavailable);
    }

    #[test]
    fn collision_with_wait_wakes_on_close_and_completes() {
        let ip = instance();
        let a = ip.lock().udp.create();
        let b = ip.lock().udp.create();
        let mut threads = Cooperative::new(|_thread| {
            ip.lock().udp.close(a);
        });
        assert_eq!(bind(&ip, &mut threads, a, 53, 0), Status::Success);
        let status = bind(&ip, &mut threads, b, 53, 50);
        assert_eq!(status, Status::Success);
        assert_eq!(ip.lock().udp.local_port(b), Some(53));
    }

    #[test]
    fn close_frees_port_for_reuse() {
        let ip = instance();
        let a = ip.lock().udp.create();
        let mut threads = Cooperative::new(|_| {});
        assert_eq!(bind(&ip, &mut threads, a, 53, 0), Status::Success);
        ip.lock().udp.close(a);
        let b = ip.lock().udp.create();
        assert_eq!(bind(&ip, &mut threads, b, 53, 0), Status::Success);
    }
}
