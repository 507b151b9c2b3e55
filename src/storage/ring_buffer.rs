//! A contiguous ring buffer over caller-owned storage, used for TCP's send
//! and receive byte streams (window accounting reads the free-space count
//! directly off this).

use core::cmp;

use super::{Empty, Full};

/// A ring buffer over a mutable slice.
///
/// Never allocates: `storage` is supplied by the caller (typically a
/// `heapless::Vec` or a fixed array) and the buffer treats it as circular.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: &'a mut [T],
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    pub fn new(storage: &'a mut [T]) -> RingBuffer<'a, T> {
        RingBuffer {
            storage,
            read_at: 0,
            length: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_full(&self) -> bool {
        self.length == self.capacity()
    }

    /// Free space remaining, i.e. the TCP receive window this ring can
    /// still advertise.
    pub fn window(&self) -> usize {
        self.capacity() - self.length
    }

    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Peeks at the item at the front of the queue, if any, without
    /// dequeuing it.
    pub fn first(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            Some(&self.storage[self.read_at])
        }
    }

    fn write_at(&self) -> usize {
        let mut pos = self.read_at + self.length;
        if pos >= self.capacity() {
            pos -= self.capacity();
        }
        pos
    }

    pub fn enqueue_one_with<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R, Full> {
        if self.is_full() {
            return Err(Full);
        }
        let at = self.write_at();
        let result = f(&mut self.storage[at]);
        self.length += 1;
        Ok(result)
    }

    /// Enqueues as many items as will fit from `data`, returning how many
    /// were actually written.
    pub fn enqueue_many_with<R>(
        &mut self,
        f: impl FnOnce(&mut [T]) -> (usize, R),
    ) -> (usize, R) {
        let write_at = self.write_at();
        let max_size = self.window();
        let contiguous = cmp::min(max_size, self.capacity() - write_at);
        let (size, result) = f(&mut self.storage[write_at..write_at + contiguous]);
        assert!(size <= contiguous);
        self.length += size;
        (size, result)
    }
}

impl<'a, T: 'a + Clone> RingBuffer<'a, T> {
    pub fn enqueue_one(&mut self, item: T) -> Result<(), Full> {
        self.enqueue_one_with(|slot| *slot = item)
    }

    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let (size_a, data) = self.enqueue_many_with(|buf| {
            let n = cmp::min(buf.len(), data.len());
            buf[..n].clone_from_slice(&data[..n]);
            (n, &data[n..])
        });
        if data.is_empty() || size_a == 0 {
            return size_a;
        }
        let (size_b, _) = self.enqueue_many_with(|buf| {
            let n = cmp::min(buf.len(), data.len());
            buf[..n].clone_from_slice(&data[..n]);
            (n, ())
        });
        size_a + size_b
    }
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    pub fn dequeue_one_with<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }
        let at = self.read_at;
        let result = f(&mut self.storage[at]);
        self.read_at = (self.read_at + 1) % self.capacity().max(1);
        self.length -= 1;
        Ok(result)
    }

    pub fn dequeue_many_with<R>(
        &mut self,
        f: impl FnOnce(&mut [T]) -> (usize, R),
    ) -> (usize, R) {
        let read_at = self.read_at;
        let contiguous = cmp::min(self.length, self.capacity() - read_at);
        let (size, result) = f(&mut self.storage[read_at..read_at + contiguous]);
        assert!(size <= contiguous);
        self.read_at = if self.capacity() == 0 {
            0
        } else {
            (self.read_at + size) % self.capacity()
        };
        self.length -= size;
        (size, result)
    }

    /// Removes the first `size` items without reading them. Used to drop
    /// an acknowledged prefix of the send ring.
    pub fn advance(&mut self, size: usize) {
        assert!(size <= self.length);
        self.read_at = if self.capacity() == 0 {
            0
        } else {
            (self.read_at + size) % self.capacity()
        };
        self.length -= size;
    }

    /// Reads up to `size` items starting `offset` items past the read
    /// cursor, without consuming them. Used by retransmission, which must
    /// re-read already-enqueued-but-unacknowledged data.
    pub fn get_unallocated(&self, offset: usize, size: usize) -> &[T] {
        if offset >= self.length || self.capacity() == 0 {
            return &[];
        }
        let start = (self.read_at + offset) % self.capacity();
        let avail = cmp::min(size, self.length - offset);
        let contiguous = cmp::min(avail, self.capacity() - start);
        &self.storage[start..start + contiguous]
    }
}

impl<'a, T: 'a + Clone> RingBuffer<'a, T> {
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let (size_a, data) = self.dequeue_many_with(|buf| {
            let n = cmp::min(buf.len(), data.len());
            data[..n].clone_from_slice(&buf[..n]);
            (n, &mut data[n..])
        });
        if data.is_empty() || size_a == 0 {
            return size_a;
        }
        let (size_b, _) = self.dequeue_many_with(|buf| {
            let n = cmp::min(buf.len(), data.len());
            data[..n].clone_from_slice(&buf[..n]);
            (n, ())
        });
        size_a + size_b
    }
}

impl<'a, T: 'a> super::Resettable for RingBuffer<'a, T> {
    fn reset(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_roundtrip() {
        let mut storage = [0u8; 4];
        let mut ring = RingBuffer::new(&mut storage);
        assert_eq!(ring.enqueue_slice(&[1, 2, 3]), 3);
        assert_eq!(ring.len(), 3);
        let mut out = [0u8; 3];
        assert_eq!(ring.dequeue_slice(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn wraps_around_capacity() {
        let mut storage = [0u8; 4];
        let mut ring = RingBuffer::new(&mut storage);
        ring.enqueue_slice(&[1, 2, 3]);
        let mut out = [0u8; 2];
        ring.dequeue_slice(&mut out);
        assert_eq!(ring.enqueue_slice(&[4, 5, 6]), 3);
        let mut out = [0u8; 4];
        assert_eq!(ring.dequeue_slice(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn advance_drops_without_reading() {
        let mut storage = [0u8; 4];
        let mut ring = RingBuffer::new(&mut storage);
        ring.enqueue_slice(&[1, 2, 3]);
        ring.advance(2);
        assert_eq!(ring.len(), 1);
        let mut out = [0u8; 1];
        ring.dequeue_slice(&mut out);
        assert_eq!(out, [3]);
    }

    #[test]
    fn get_unallocated_reads_without_consuming() {
        let mut storage = [0u8; 8];
        let mut ring = RingBuffer::new(&mut storage);
        ring.enqueue_slice(&[1, 2, 3, 4]);
        assert_eq!(ring.get_unallocated(1, 2), &[2, 3]);
        assert_eq!(ring.len(), 4);
    }
}
