//! Status codes returned by every operation in this crate.
//!
//! These are domain enumerations, not host OS error codes: callers match on
//! variants, never on raw integers. No operation here logs or retries on
//! error; every partial mutation made earlier in the same call is rolled
//! back before the status is returned.

use core::fmt;

/// Completion status of a protocol operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation completed immediately and successfully.
    Success,
    /// The packet pool had no free buffer to satisfy an allocation.
    NoPacket,
    /// `bind` with `port == ANY_PORT` found no free port in the ephemeral range.
    NoFreePorts,
    /// The socket is already bound, or another thread's bind is in progress on it.
    AlreadyBound,
    /// `connect` was called on a socket that is not yet bound.
    NotBound,
    /// `connect` was called on a socket that is not in the `CLOSED` state.
    NotClosed,
    /// The outgoing interface's MTU cannot carry an IP + TCP header.
    InvalidInterface,
    /// `route_find` could not reach the destination from any interface.
    AddressUnreachable,
    /// The operation was started but will complete asynchronously; no error occurred.
    InProgress,
    /// A non-waiting bind collided with an already-bound port.
    PortUnavailable,
    /// A suspended thread's wait expired before the condition it waited on was met.
    Timeout,
    /// A suspended thread's wait was cancelled by the caller (not a timeout).
    Aborted,
    /// A multicast group/interface pair used by the caller is not in the join table.
    EntryNotFound,
}

impl Status {
    /// `true` for every variant other than [`Status::Success`].
    pub const fn is_error(self) -> bool {
        !matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::NoPacket => "packet pool exhausted",
            Status::NoFreePorts => "no free ports in ephemeral range",
            Status::AlreadyBound => "socket already bound or bind in progress",
            Status::NotBound => "socket not bound",
            Status::NotClosed => "socket not in CLOSED state",
            Status::InvalidInterface => "interface MTU too small",
            Status::AddressUnreachable => "destination unreachable",
            Status::InProgress => "operation in progress",
            Status::PortUnavailable => "port unavailable",
            Status::Timeout => "wait timed out",
            Status::Aborted => "wait aborted",
            Status::EntryNotFound => "entry not found",
        };
        f.write_str(text)
    }
}
