//! IPv4 fragment reassembly: a small, fixed number of in-flight
//! datagrams are tracked by `(ident, src, dst, protocol)`; fragments arrive
//! in any order and are copied into a per-datagram buffer at their offset,
//! with the received-span list kept sorted by offset so an out-of-order
//! arrival doesn't stall the completeness check. A datagram is delivered
//! to the rest of the stack only once every byte up to the one carried by
//! the final (non-MF) fragment has arrived. Overlapping fragments are not
//! tolerated: any overlap aborts the whole datagram rather than risking
//! one fragment silently clobbering another.
//!
//! Outgoing fragmentation is out of scope: this stack's own TCP and UDP
//! senders size segments to fit the link MTU, so nothing it originates ever
//! needs to be split (see DESIGN.md).

use crate::time::{Duration, Instant};
use crate::wire::Ipv4FragKey;

/// How many datagrams can be mid-reassembly at once.
const MAX_FRAGMENT_SETS: usize = 4;
/// Largest reassembled datagram this stack will hold in memory.
const MAX_REASSEMBLED_LEN: usize = 8192;
/// A reassembly slot older than this without a new fragment arriving is
/// dropped, freeing it up for a new datagram: a lost fragment must not
/// wedge a slot forever.
const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

fn overlaps(a: &Span, b: &Span) -> bool {
    a.start < b.end && b.start < a.end
}

struct Slot {
    key: Ipv4FragKey,
    data: [u8; MAX_REASSEMBLED_LEN],
    received: heapless::Vec<Span, 16>,
    total_len: Option<usize>,
    last_seen: Instant,
}

impl Slot {
    /// Assumes `self.received` is sorted by `start` — callers must keep it
    /// that way, since fragments arrive in arbitrary order.
    fn covers_whole(&self) -> bool {
        let Some(total_len) = self.total_len else {
            return false;
        };
        let mut covered = 0usize;
        for span in self.received.iter() {
            if span.start > covered {
                return false;
            }
            covered = covered.max(span.end);
        }
        covered >= total_len
    }
}

/// Holds all in-flight IPv4 reassembly state for an interface.
pub struct FragmentsBuffer {
    slots: heapless::Vec<Slot, MAX_FRAGMENT_SETS>,
    /// Scratch space a completed reassembly is copied into. Borrowing the
    /// returned payload from here (rather than handing back an owned
    /// buffer) lets it carry the same lifetime as the `&mut FragmentsBuffer`
    /// the ingress path already holds, so it can be handed to the UDP/TCP
    /// demux the same way an unfragmented datagram's payload is.
    scratch: [u8; MAX_REASSEMBLED_LEN],
}

impl FragmentsBuffer {
    pub fn new() -> Self {
        FragmentsBuffer {
            slots: heapless::Vec::new(),
            scratch: [0u8; MAX_REASSEMBLED_LEN],
        }
    }

    /// Folds in one fragment. Returns the length of the reassembled payload
    /// once the datagram is complete (retrievable via
    /// [`FragmentsBuffer::reassembled`]), and removes the slot so the
    /// datagram cannot be reassembled a second time on a later duplicate
    /// fragment.
    pub(crate) fn assemble(
        &mut self,
        key: Ipv4FragKey,
        offset: usize,
        more_frags: bool,
        data: &[u8],
        now: Instant,
    ) -> Option<usize> {
        self.reap(now);

        let end = offset.checked_add(data.len())?;
        if end > MAX_REASSEMBLED_LEN {
            return None;
        }

        let index = match self.slots.iter().position(|s| s.key == key) {
            Some(i) => i,
            None => {
                if self.slots.is_full() {
                    // Evict the oldest in-flight set to make room; a lost
                    // fragment set is better than refusing all new ones.
                    if let Some((i, _)) = self
                        .slots
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, s)| s.last_seen.total_millis())
                    {
                        self.slots.remove(i);
                    }
                }
                let slot = Slot {
                    key,
                    data: [0u8; MAX_REASSEMBLED_LEN],
                    received: heapless::Vec::new(),
                    total_len: None,
                    last_seen: now,
                };
                self.slots.push(slot).ok()?;
                self.slots.len() - 1
            }
        };

        let new_span = Span { start: offset, end };
        if self.slots[index].received.iter().any(|s| overlaps(s, &new_span)) {
            // No overlap is tolerated: abort the whole datagram rather
            // than let two fragments claim the same bytes.
            self.slots.remove(index);
            return None;
        }

        let slot = &mut self.slots[index];
        slot.last_seen = now;
        slot.data[offset..end].copy_from_slice(data);
        let _ = slot.received.push(new_span);
        slot.received.sort_unstable_by_key(|s| s.start);
        if !more_frags {
            slot.total_len = Some(end);
        }

        if slot.covers_whole() {
            let total_len = slot.total_len?;
            self.scratch[..total_len].copy_from_slice(&slot.data[..total_len]);
            self.slots.remove(index);
            Some(total_len)
        } else {
            None
        }
    }

    /// The payload most recently completed by [`FragmentsBuffer::assemble`].
    pub(crate) fn reassembled(&self, len: usize) -> &[u8] {
        &self.scratch[..len]
    }

    fn reap(&mut self, now: Instant) {
        while let Some(i) = self
            .slots
            .iter()
            .position(|s| now.checked_duration_since(s.last_seen) >= REASSEMBLY_TIMEOUT)
        {
            self.slots.remove(i);
        }
    }
}

/// Outgoing-fragmentation state. Kept as a named type (rather than deleted
/// outright) so the interface's dispatch path has somewhere to plug it in
/// if that non-goal is ever revisited.
pub struct Fragmenter;

impl Fragmenter {
    pub fn new() -> Self {
        Fragmenter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Ipv4Address, Ipv4FragKey as Key, IpProtocol};

    fn key() -> Key {
        Key {
            id: 7,
            src_addr: Ipv4Address::new(10, 0, 0, 1),
            dst_addr: Ipv4Address::new(10, 0, 0, 2),
            protocol: IpProtocol::Udp,
        }
    }

    #[test]
    fn two_fragments_reassemble_in_order() {
        let mut buf = FragmentsBuffer::new();
        assert!(buf
            .assemble(key(), 0, true, &[1, 2, 3, 4], Instant::from_millis(0))
            .is_none());
        let len = buf
            .assemble(key(), 4, false, &[5, 6], Instant::from_millis(1))
            .unwrap();
        assert_eq!(buf.reassembled(len), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn out_of_order_fragments_still_reassemble() {
        let mut buf = FragmentsBuffer::new();
        assert!(buf
            .assemble(key(), 4, false, &[5, 6], Instant::from_millis(0))
            .is_none());
        let len = buf
            .assemble(key(), 0, true, &[1, 2, 3, 4], Instant::from_millis(1))
            .unwrap();
        assert_eq!(buf.reassembled(len), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn overlapping_fragments_abort_the_datagram() {
        let mut buf = FragmentsBuffer::new();
        assert!(buf
            .assemble(key(), 0, true, &[1, 2, 3, 4], Instant::from_millis(0))
            .is_none());
        // Overlaps [2, 4) of the first fragment.
        assert!(buf
            .assemble(key(), 2, false, &[0xff, 0xff, 0xff], Instant::from_millis(1))
            .is_none());
        // The whole datagram was aborted, so completing what would have
        // been the tail doesn't reassemble anything either — it starts a
        // brand new slot instead.
        assert!(buf
            .assemble(key(), 4, false, &[5, 6], Instant::from_millis(2))
            .is_none());
    }

    #[test]
    fn stale_slot_is_reaped() {
        let mut buf = FragmentsBuffer::new();
        buf.assemble(key(), 0, true, &[1, 2], Instant::from_millis(0));
        assert!(buf
            .assemble(
                key(),
                4,
                false,
                &[5, 6],
                Instant::from_millis(REASSEMBLY_TIMEOUT.total_millis() + 1)
            )
            .is_none());
        // The stale first fragment was reaped, so this incomplete second
        // fragment starts a fresh slot rather than completing the old one.
    }
}
