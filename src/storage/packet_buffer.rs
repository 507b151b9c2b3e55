//! A bounded queue of length-delimited datagrams with per-datagram metadata,
//! used by UDP and ICMP sockets where message boundaries must survive the
//! trip through the socket, unlike TCP's byte stream.

use core::fmt;
use core::marker::PhantomData;
use std::collections::VecDeque;

use super::{Empty, Full, Resettable};

/// Per-datagram metadata: a header value `H` (e.g. `udp::UdpMetadata` or an
/// ICMP `IpAddress`) plus the datagram's payload length.
#[derive(Debug, Clone, Copy)]
pub struct PacketMetadata<H> {
    pub header: H,
    pub size: usize,
}

/// A queue of datagrams bounded by both entry count and total payload bytes.
///
/// Unlike `RingBuffer`, storage is heap-owned rather than caller-supplied;
/// the `'a` parameter is kept only so existing call sites that name
/// `PacketBuffer<'a, H>` (mirroring a borrowed-storage style socket buffer)
/// don't need to change shape.
#[derive(Debug)]
pub struct PacketBuffer<'a, H> {
    queue: VecDeque<(H, Vec<u8>)>,
    max_entries: usize,
    max_bytes: usize,
    used_bytes: usize,
    _marker: PhantomData<&'a ()>,
}

impl<'a, H> PacketBuffer<'a, H> {
    pub fn new(max_entries: usize, max_bytes: usize) -> PacketBuffer<'a, H> {
        PacketBuffer {
            queue: VecDeque::new(),
            max_entries,
            max_bytes,
            used_bytes: 0,
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.max_entries
    }

    pub fn payload_bytes_available(&self) -> usize {
        self.max_bytes.saturating_sub(self.used_bytes)
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.used_bytes = 0;
    }

    pub fn enqueue_slice(&mut self, header: H, data: &[u8]) -> Result<(), Full> {
        if self.is_full() || data.len() > self.payload_bytes_available() {
            return Err(Full);
        }
        self.used_bytes += data.len();
        self.queue.push_back((header, data.to_vec()));
        Ok(())
    }

    pub fn dequeue_with<R>(&mut self, f: impl FnOnce(&H, &[u8]) -> R) -> Result<R, Empty> {
        let (header, data) = self.queue.pop_front().ok_or(Empty)?;
        self.used_bytes -= data.len();
        Ok(f(&header, &data))
    }

    pub fn peek(&self) -> Result<(&H, usize), Empty> {
        self.queue
            .front()
            .map(|(h, d)| (h, d.len()))
            .ok_or(Empty)
    }
}

impl<'a, H> Resettable for PacketBuffer<'a, H> {
    fn reset(&mut self) {
        PacketBuffer::reset(self);
    }
}

impl<H> fmt::Display for PacketMetadata<H> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "size={}", self.size)
    }
}
