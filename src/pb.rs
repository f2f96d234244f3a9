//! Packet buffer pool.
//!
//! Grounded on the fixed-chunk pool discipline described in §4.1/§9 of the
//! core spec and on the arena-of-structs style `netstack/types.rs` uses for
//! `TcpConnection` storage: buffers live in one `Vec<Slot>` owned by the
//! pool, handed out by stable index, and never moved while on loan.
//!
//! A buffer's content lives in `[head, tail)` of its fixed-size chunk.
//! `prepend` walks `head` backwards to make room for a header; `set_length`
//! fixes `tail` directly, for callers that already know the final payload
//! size. Both are independent primitives -- callers compose them as needed,
//! they don't stack additively for the same bytes.

use alloc::vec::Vec;

use crate::error::Status;
use crate::ip::InterfaceIndex;

/// Bytes held in one pool chunk. Sized for an Ethernet frame; callers whose
/// `size_hint` doesn't fit get `Status::NoPacket` rather than a short buffer.
pub const CHUNK_SIZE: usize = 1536;

/// Bytes of headroom reserved below the initial head cursor so link/IP/proto
/// headers can all be prepended without reallocating.
const HEADROOM: usize = 64;

/// Handle to a packet buffer on loan from a [`PacketPool`].
///
/// Exactly one of {pool free list, caller, transmit queue, receive queue}
/// owns a given buffer at any moment; `PacketPool::release` is the only way
/// back to the free list.
#[derive(Debug)]
pub struct PacketBuffer {
    slot: usize,
    head: usize,
    tail: usize,
    /// Interface this buffer is bound to for transmission, if any.
    pub interface: Option<InterfaceIndex>,
    /// Next-hop address for the packet this buffer carries.
    pub next_hop: [u8; 4],
}

impl PacketBuffer {
    /// Current content length, `tail - head`.
    pub fn length(&self) -> usize {
        self.tail - self.head
    }

    /// Make room for `n` header bytes directly before the current content
    /// and extend the length by `n`. Returns the newly-reserved region so
    /// the caller can write the header into it.
    pub fn prepend(&mut self, data: &mut [u8; CHUNK_SIZE], n: usize) -> Result<&mut [u8], Status> {
        if n > self.head {
            return Err(Status::NoPacket);
        }
        self.head -= n;
        Ok(&mut data[self.head..self.head + n])
    }

    /// Set the content length directly by moving `tail`, without touching
    /// `head`. Used when the caller has already written `n` bytes starting
    /// at the current head (e.g. a freshly allocated, still-empty buffer).
    pub fn set_length(&mut self, n: usize) -> Result<(), Status> {
        if self.head + n > CHUNK_SIZE {
            return Err(Status::NoPacket);
        }
        self.tail = self.head + n;
        Ok(())
    }

    /// Immutable view of the current content.
    pub fn data<'a>(&self, chunk: &'a [u8; CHUNK_SIZE]) -> &'a [u8] {
        &chunk[self.head..self.tail]
    }

    /// Mutable view of the current content.
    pub fn data_mut<'a>(&self, chunk: &'a mut [u8; CHUNK_SIZE]) -> &'a mut [u8] {
        &mut chunk[self.head..self.tail]
    }
}

struct Slot {
    chunk: [u8; CHUNK_SIZE],
    free: bool,
}

/// A fixed-size free list of packet chunks.
///
/// `allocate` never blocks when `wait == 0`; on failure no buffer is handed
/// back and the caller must not touch any buffer pointer. A buffer leaked by
/// a failed send path anywhere above this pool is a bug.
pub struct PacketPool {
    slots: Vec<Slot>,
}

impl PacketPool {
    /// Build a pool of `capacity` fixed-size chunks, all initially free.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                chunk: [0u8; CHUNK_SIZE],
                free: true,
            });
        }
        PacketPool { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.free).count()
    }

    /// Allocate a buffer with at least `size_hint` bytes of usable region
    /// above the head cursor. `wait == 0` never blocks -- there is no
    /// suspension path here, because a packet pool exhaustion is resolved
    /// by the transmit/receive paths freeing buffers, not by time passing.
    pub fn allocate(&mut self, size_hint: usize, _wait: u32) -> Result<PacketBuffer, Status> {
        if HEADROOM + size_hint > CHUNK_SIZE {
            return Err(Status::NoPacket);
        }
        let slot_index = self.slots.iter().position(|s| s.free).ok_or(Status::NoPacket)?;
        self.slots[slot_index].free = false;
        Ok(PacketBuffer {
            slot: slot_index,
            head: HEADROOM,
            tail: HEADROOM,
            interface: None,
            next_hop: [0; 4],
        })
    }

    /// Return a buffer to the free list. Callers must not use `pb` again.
    pub fn release(&mut self, pb: PacketBuffer) {
        self.slots[pb.slot].free = true;
    }

    /// Borrow the raw chunk backing `pb`, for header construction and
    /// transmission.
    pub fn chunk_mut(&mut self, pb: &PacketBuffer) -> &mut [u8; CHUNK_SIZE] {
        &mut self.slots[pb.slot].chunk
    }

    pub fn chunk(&self, pb: &PacketBuffer) -> &[u8; CHUNK_SIZE] {
        &self.slots[pb.slot].chunk
    }
}
