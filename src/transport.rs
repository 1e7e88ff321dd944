//! Lock-free SPSC byte rings bridging the tick context and the foreground loop.
//!
//! Two of these exist in the running system: the receive ring (produced by the
//! serial interrupt side, consumed by the foreground) and the transmit ring
//! (produced by the foreground, consumed by the serial interrupt side). No
//! locking — safety rests on the single-producer / single-consumer discipline
//! and single-word Acquire/Release cursor updates.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Fixed-capacity SPSC byte ring.
///
/// `N` must be a power of two; cursors run free and are masked on access, so
/// empty ⇔ `head == tail` with no wasted slot.
///
/// A full ring never overwrites unread data: `put` rejects the new byte and
/// counts the overrun instead, so loss is observable from the foreground.
pub struct TransportQueue<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    /// Producer cursor.
    head: AtomicUsize,
    /// Consumer cursor.
    tail: AtomicUsize,
    /// Bytes rejected because the ring was full.
    overruns: AtomicU32,
}

// Safety: sound under the SPSC discipline documented above — each cursor has
// exactly one writer, and data slots are published/retired through the
// Release/Acquire cursor pair.
unsafe impl<const N: usize> Send for TransportQueue<N> {}
unsafe impl<const N: usize> Sync for TransportQueue<N> {}

impl<const N: usize> TransportQueue<N> {
    pub const fn new() -> Self {
        assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
        Self {
            buf: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overruns: AtomicU32::new(0),
        }
    }

    const fn mask(&self) -> usize {
        N - 1
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking peek: true when at least one byte is waiting.
    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    /// Bytes dropped so far by a producer running into a full ring.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Producer side. Appends one byte without blocking.
    ///
    /// Returns `false` and bumps the overrun counter when the ring is full;
    /// the byte is dropped and unread data stays intact.
    pub fn put(&self, byte: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        unsafe {
            (*self.buf.get())[head & self.mask()] = byte;
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Producer side, bulk. Returns how many bytes were accepted.
    pub fn put_bytes(&self, bytes: &[u8]) -> usize {
        let mut n = 0;
        for &b in bytes {
            if !self.put(b) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Consumer side, non-blocking.
    pub fn try_get(&self) -> Option<u8> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);

        if head == tail {
            return None;
        }

        let byte = unsafe { (*self.buf.get())[tail & self.mask()] };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Consumer side. Removes the oldest byte, spinning until one arrives.
    ///
    /// Spinning blocks the whole foreground loop, so only call this after
    /// `has_data()` has returned true.
    pub fn get(&self) -> u8 {
        loop {
            if let Some(byte) = self.try_get() {
                return byte;
            }
            core::hint::spin_loop();
        }
    }

    /// Consumer side, bulk drain into `out`. Returns bytes copied.
    pub fn get_bytes(&self, out: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in out.iter_mut() {
            match self.try_get() {
                Some(b) => {
                    *slot = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Discard everything unread. Consumer side only.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }
}

impl<const N: usize> Default for TransportQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q: TransportQueue<16> = TransportQueue::new();
        assert!(!q.has_data());

        for b in b"vortex" {
            assert!(q.put(*b));
        }
        assert_eq!(q.len(), 6);

        let mut out = [0u8; 8];
        let n = q.get_bytes(&mut out);
        assert_eq!(&out[..n], b"vortex");
        assert!(q.is_empty());
    }

    #[test]
    fn get_returns_oldest() {
        let q: TransportQueue<8> = TransportQueue::new();
        q.put(1);
        q.put(2);
        assert!(q.has_data());
        assert_eq!(q.get(), 1);
        assert_eq!(q.get(), 2);
    }

    #[test]
    fn full_ring_rejects_and_counts() {
        let q: TransportQueue<4> = TransportQueue::new();
        for b in 0..4 {
            assert!(q.put(b));
        }
        // Unread data must survive the overflow attempt.
        assert!(!q.put(99));
        assert!(!q.put(100));
        assert_eq!(q.overruns(), 2);
        assert_eq!(q.try_get(), Some(0));
        // One slot freed — accepted again.
        assert!(q.put(4));
        let mut out = [0u8; 4];
        assert_eq!(q.get_bytes(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn cursors_wrap_across_capacity() {
        let q: TransportQueue<4> = TransportQueue::new();
        // Push/pop well past N to exercise the free-running cursors.
        for round in 0u8..64 {
            assert!(q.put(round));
            assert_eq!(q.try_get(), Some(round));
        }
        assert!(q.is_empty());
        assert_eq!(q.overruns(), 0);
    }

    #[test]
    fn clear_discards_unread() {
        let q: TransportQueue<8> = TransportQueue::new();
        q.put_bytes(b"junk");
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.try_get(), None);
    }
}
