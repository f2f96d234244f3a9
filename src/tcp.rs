//! TCP client-side active open (§4.6): `CLOSED` -> `SYN_SENT`.
//!
//! Grounded on `original_source/.../nx_tcp_client_socket_connect.c`: the
//! MTU-before-allocation check, the initial sequence number reseed formula,
//! and the rule that the IP instance's own internal thread must never
//! suspend itself inside `connect` even when asked to wait. The socket
//! shape borrows the teacher's arena style from `netstack/types.rs`'s
//! `TcpConnection` (a plain struct kept in a `Vec`, looked up by index)
//! rather than its flat per-field `Option` bookkeeping.
//!
//! `ESTABLISHED` and every state beyond it are out of this crate's scope --
//! nothing here ever processes an inbound SYN-ACK, so a suspended `connect`
//! can only ever be woken by a timeout or an explicit abort, never by
//! success. The full state enum is still carried because the data model
//! names it, even though most of its variants are unreachable here.

use alloc::vec::Vec;

use crate::error::Status;
use crate::ip::{InterfaceIndex, IpInstance, IpState, Ipv4Address};
use crate::rng::random_u16;
use crate::route::route_find;
use crate::suspend::{HostThreads, WaitQueue};
use crate::transmit::{FragmentPolicy, PacketTransmit, Precedence};

pub const IP_PROTO_TCP: u8 = 6;
const DEFAULT_TTL: u8 = 128;
const TCP_HEADER_SIZE: usize = 20;
const MIN_MTU_FOR_TCP: u16 = 20 /* IP */ + TCP_HEADER_SIZE as u16;

bitflags::bitflags! {
    /// The control bits of a TCP header's flags octet (RFC 793 §3.1).
    /// Only `SYN` is ever set by this crate's one operation, `connect`; the
    /// rest are carried so the type matches the wire format it names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// Every state a TCP connection can be in. Only `Closed` and `SynSent` are
/// reachable through this crate's single operation, `connect`; the rest
/// exist because the data model names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// A TCP connection's control block.
#[derive(Debug)]
pub struct TcpSocket {
    pub state: TcpState,
    pub local_port: u16,
    pub bound: bool,

    pub connect_ip: Ipv4Address,
    pub connect_port: u16,
    pub connect_interface: Option<InterfaceIndex>,
    pub next_hop_address: Ipv4Address,

    pub tx_sequence: u32,
    pub rx_sequence: u32,
    /// Configured receive window, set at `create` and survives `CLOSED` --
    /// it is a per-socket configuration value, not a transient connection
    /// field, and `connect` step 9 resets `rx_window_current`/
    /// `rx_window_last_sent` from it rather than the other way around.
    pub rx_window_default: u32,
    pub rx_window_current: u32,
    pub rx_window_last_sent: u32,
    pub congestion_window: u32,
    pub bytes_outstanding: u32,

    pub tx_queue_count: u32,
    pub rx_queue_count: u32,
    pub fin_received: bool,

    pub timeout_count: u32,
    pub retry_count: u32,

    connect_wait: WaitQueue,
}

impl Default for TcpSocket {
    fn default() -> Self {
        TcpSocket {
            state: TcpState::Closed,
            local_port: 0,
            bound: false,
            connect_ip: [0; 4],
            connect_port: 0,
            connect_interface: None,
            next_hop_address: [0; 4],
            tx_sequence: 0,
            rx_sequence: 0,
            rx_window_default: 0,
            rx_window_current: 0,
            rx_window_last_sent: 0,
            congestion_window: 0,
            bytes_outstanding: 0,
            tx_queue_count: 0,
            rx_queue_count: 0,
            fin_received: false,
            timeout_count: 0,
            retry_count: 0,
            connect_wait: WaitQueue::new(),
        }
    }
}

/// Create a fresh, unbound, `Closed` socket and return its arena index.
/// Reuses a vacated slot before growing the arena. `rx_window_default` is
/// the receive window this socket advertises on every `connect` (NetX's
/// `nx_tcp_socket_create` takes the same parameter); `connect` step 9
/// resets `rx_window_current`/`rx_window_last_sent` from it on every call,
/// it never reads back from the connect site.
pub fn create(state: &mut IpState, rx_window_default: u32) -> usize {
    let socket = TcpSocket { rx_window_default, ..TcpSocket::default() };
    if let Some(index) = state.tcp_sockets.iter().position(|s| s.is_none()) {
        state.tcp_sockets[index] = Some(socket);
        return index;
    }
    state.tcp_sockets.push(Some(socket));
    state.tcp_sockets.len() - 1
}

/// Assign a local port directly, without the collision/suspension handling
/// `udp::bind` does -- a TCP client socket's local port is a prerequisite
/// for `connect`, not a contended resource in this crate's scope.
pub fn bind_local(state: &mut IpState, socket: usize, port: u16) -> Status {
    match state.tcp_sockets.get_mut(socket) {
        Some(Some(sock)) if sock.state == TcpState::Closed => {
            sock.local_port = port;
            sock.bound = true;
            Status::Success
        }
        Some(Some(_)) => Status::NotClosed,
        _ => Status::EntryNotFound,
    }
}

/// Compute the initial sequence number for this connection attempt from
/// the socket's own current `tx_sequence` (§4.6 step 8; NetX's
/// `nx_tcp_client_socket_connect.c` reads and writes
/// `socket_ptr -> nx_tcp_socket_tx_sequence` directly, never an IP-wide
/// seed). Never "improved" beyond the original formula: a zero
/// `tx_sequence` (first connection this socket has ever made) draws a
/// full 32-bit random value; any other value derives from itself plus a
/// fixed stride plus fresh entropy, so ISNs climb rather than cluster --
/// and, critically, a fresh socket's first connect is never mistaken for
/// a reconnect just because some other socket on the same IP instance
/// already has a non-zero sequence.
fn reseed_isn(current_tx_sequence: u32) -> u32 {
    if current_tx_sequence == 0 {
        ((random_u16(current_tx_sequence as u64) as u32) << 16)
            | random_u16(!(current_tx_sequence as u64)) as u32
    } else {
        current_tx_sequence
            .wrapping_add(0x10000)
            .wrapping_add(random_u16(current_tx_sequence as u64) as u32)
    }
}

fn checksum_fold(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut iter = bytes.chunks_exact(2);
    for word in &mut iter {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = iter.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !(sum as u16)
}

/// Build a 20-byte SYN segment with no options and no payload.
fn build_syn_segment(
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    window: u16,
) -> [u8; TCP_HEADER_SIZE] {
    let mut header = [0u8; TCP_HEADER_SIZE];
    header[0..2].copy_from_slice(&src_port.to_be_bytes());
    header[2..4].copy_from_slice(&dst_port.to_be_bytes());
    header[4..8].copy_from_slice(&seq.to_be_bytes());
    header[8..12].copy_from_slice(&0u32.to_be_bytes()); // ack
    header[12] = 5 << 4; // data offset, no options
    header[13] = TcpFlags::SYN.bits();
    header[14..16].copy_from_slice(&window.to_be_bytes());
    header[16..18].copy_from_slice(&0u16.to_be_bytes()); // checksum, filled below
    header[18..20].copy_from_slice(&0u16.to_be_bytes()); // urgent pointer

    let mut pseudo_and_header = Vec::with_capacity(12 + TCP_HEADER_SIZE);
    pseudo_and_header.extend_from_slice(&src_ip);
    pseudo_and_header.extend_from_slice(&dst_ip);
    pseudo_and_header.push(0);
    pseudo_and_header.push(IP_PROTO_TCP);
    pseudo_and_header.extend_from_slice(&(TCP_HEADER_SIZE as u16).to_be_bytes());
    pseudo_and_header.extend_from_slice(&header);

    let checksum = checksum_fold(&pseudo_and_header);
    header[16..18].copy_from_slice(&checksum.to_be_bytes());
    header
}

/// Actively open a TCP connection on a bound, `Closed` socket (§4.6).
///
/// `wait_ticks == 0`, and any call made from the IP instance's own
/// housekeeping thread regardless of `wait_ticks`, return
/// `Status::InProgress` as soon as the SYN is sent: the handshake is not
/// yet complete, but nothing failed. Any other caller with `wait_ticks > 0`
/// suspends on the socket's own wait list; since this crate does not
/// process inbound segments, that suspension can only end in
/// `Status::Timeout` or an externally triggered abort, never success.
pub fn connect(
    ip: &IpInstance,
    transmit: &mut dyn PacketTransmit,
    threads: &mut dyn HostThreads,
    socket: usize,
    remote_ip: Ipv4Address,
    remote_port: u16,
    wait_ticks: u32,
) -> Status {
    let mut state = ip.lock();

    let (local_port, bound, current_tx_sequence, rx_window_default) = match state.tcp_sockets.get(socket) {
        Some(Some(sock)) => (sock.local_port, sock.bound, sock.tx_sequence, sock.rx_window_default),
        _ => return Status::EntryNotFound,
    };
    if !bound {
        return Status::NotBound;
    }
    if state.tcp_sockets[socket].as_ref().unwrap().state != TcpState::Closed {
        return Status::NotClosed;
    }

    let (interface_index, next_hop) = match route_find(&state, remote_ip) {
        Ok(route) => route,
        Err(status) => {
            log::debug!("tcp connect: socket {} has no route to {:?}", socket, remote_ip);
            return status;
        }
    };
    let mtu = state.interface(interface_index).map(|iface| iface.mtu).unwrap_or(0);
    if mtu < MIN_MTU_FOR_TCP {
        log::debug!("tcp connect: interface {} mtu {} too small for a TCP segment", interface_index, mtu);
        return Status::InvalidInterface;
    }

    let mut pb = match state.pool.allocate(TCP_HEADER_SIZE, 0) {
        Ok(pb) => pb,
        Err(status) => {
            log::debug!("tcp connect: packet pool exhausted for socket {}", socket);
            return status;
        }
    };
    pb.interface = Some(interface_index);
    pb.next_hop = next_hop;

    let local_ip = state.interface(interface_index).map(|iface| iface.ip_address).unwrap_or([0; 4]);
    // The SYN itself carries the raw ISN; the socket's running tx_sequence
    // is then advanced past it to account for the SYN's own octet (§4.6
    // step 9), so the next byte sent is numbered isn + 1.
    let isn = reseed_isn(current_tx_sequence);
    let window = rx_window_default.min(u16::MAX as u32) as u16;
    let segment = build_syn_segment(local_ip, remote_ip, local_port, remote_port, isn, window);

    {
        let chunk = state.pool.chunk_mut(&pb);
        let region = match pb.prepend(chunk, TCP_HEADER_SIZE) {
            Ok(region) => region,
            Err(status) => {
                state.pool.release(pb);
                return status;
            }
        };
        region.copy_from_slice(&segment);
    }

    {
        let sock = state.tcp_sockets[socket].as_mut().unwrap();
        sock.state = TcpState::SynSent;
        sock.connect_ip = remote_ip;
        sock.connect_port = remote_port;
        sock.connect_interface = Some(interface_index);
        sock.next_hop_address = next_hop;
        sock.tx_sequence = isn.wrapping_add(1);
        sock.rx_sequence = 0;
        // §4.6 step 9: reset current/last-sent from the socket's own
        // configured default, not from a value handed in by this call.
        sock.rx_window_current = sock.rx_window_default;
        sock.rx_window_last_sent = sock.rx_window_default;
        sock.congestion_window = 0;
        sock.bytes_outstanding = 0;
        sock.fin_received = false;
        sock.timeout_count = 0;
        sock.retry_count = 0;
    }

    // Both counters live behind the one `disable_tcp_info` gate (original:
    // a single `#ifndef NX_DISABLE_TCP_INFO` wraps both increments).
    if !state.config.disable_tcp_info {
        state.counters.tcp_connections += 1;
        state.counters.tcp_active_connections += 1;
    }

    log::trace!("tcp connect: socket {} sending SYN to {:?}:{} (isn {})", socket, remote_ip, remote_port, isn);

    transmit.ip_packet_send(
        &mut state.pool,
        pb,
        remote_ip,
        Precedence::Normal,
        DEFAULT_TTL,
        IP_PROTO_TCP,
        FragmentPolicy::Allowed,
    );

    if wait_ticks == 0 {
        return Status::InProgress;
    }
    if state.housekeeping_thread == Some(threads.current()) {
        log::trace!("tcp connect: housekeeping thread skips suspension for socket {}", socket);
        return Status::InProgress;
    }

    let thread = threads.current();
    state.tcp_sockets[socket].as_mut().unwrap().connect_wait.push(thread, wait_ticks);
    drop(state);

    threads.park(thread, wait_ticks);

    let mut state = ip.lock();
    let woken = state.tcp_sockets[socket].as_mut().unwrap().connect_wait.remove(thread, Status::Timeout);
    let Some(waiter) = woken else {
        return Status::InProgress;
    };
    let disable_tcp_info = state.config.disable_tcp_info;
    let sock = state.tcp_sockets[socket].as_mut().unwrap();
    sock.timeout_count += 1;
    log::debug!("tcp connect: socket {} timed out waiting for SYN-ACK", socket);
    if waiter.status.is_error() {
        // §4.6 step 14: a non-zero suspend status rolls the socket all the
        // way back to CLOSED with every transient field zeroed, exactly as
        // a synchronous connect failure would.
        sock.state = TcpState::Closed;
        sock.connect_ip = [0; 4];
        sock.connect_port = 0;
        sock.connect_interface = None;
        sock.next_hop_address = [0; 4];
        sock.tx_sequence = 0;
        sock.rx_sequence = 0;
        sock.rx_window_current = 0;
        sock.rx_window_last_sent = 0;
        sock.congestion_window = 0;
        sock.bytes_outstanding = 0;
        sock.tx_queue_count = 0;
        sock.rx_queue_count = 0;
        sock.fin_received = false;
        if !disable_tcp_info {
            state.counters.tcp_active_connections = state.counters.tcp_active_connections.saturating_sub(1);
        }
    }
    waiter.status
}
