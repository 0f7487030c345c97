//! Fixed-capacity byte rings between the serial interrupt side and the main loop.
//!
//! Each ring is single-producer single-consumer. A push into a full ring drops the new
//! byte and leaves the buffered bytes untouched; the drop is counted so it can be logged.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Capacity of the receive ring on the board.
pub const RX_CAPACITY: usize = 128;

/// Default capacity of the transmit ring; holds a complete measurement cycle.
pub const TX_CAPACITY: usize = 512;

/// Create a ring of `capacity` bytes, split into its two halves.
pub fn byte_ring(capacity: usize) -> (ByteProducer, ByteConsumer) {
    let (prod, cons) = HeapRb::<u8>::new(capacity.max(1)).split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ByteProducer {
            inner: prod,
            dropped: dropped.clone(),
        },
        ByteConsumer {
            inner: cons,
            dropped,
        },
    )
}

/// Writing half of a byte ring.
pub struct ByteProducer {
    inner: HeapProducer<u8>,
    dropped: Arc<AtomicU64>,
}

impl ByteProducer {
    /// Append one byte. Returns `false` (and counts a drop) if the ring is full.
    pub fn push(&mut self, byte: u8) -> bool {
        match self.inner.push(byte) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Append as many bytes as fit; the rest are dropped. Returns the number stored.
    pub fn push_all(&mut self, bytes: &[u8]) -> usize {
        let stored = self.inner.push_slice(bytes);
        let lost = bytes.len() - stored;
        if lost > 0 {
            self.dropped.fetch_add(lost as u64, Ordering::Relaxed);
        }
        stored
    }

    /// Bytes that can be pushed before the ring is full.
    pub fn free_len(&self) -> usize {
        self.inner.free_len()
    }

    /// Count `lost` bytes discarded without being offered to the ring.
    pub fn count_dropped(&mut self, lost: usize) {
        self.dropped.fetch_add(lost as u64, Ordering::Relaxed);
    }

    /// Bytes dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Reading half of a byte ring.
pub struct ByteConsumer {
    inner: HeapConsumer<u8>,
    dropped: Arc<AtomicU64>,
}

impl ByteConsumer {
    /// Take the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        self.inner.pop()
    }

    /// Move everything currently buffered into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<u8>) -> usize {
        let before = out.len();
        while let Some(byte) = self.inner.pop() {
            out.push(byte);
        }
        out.len() - before
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Bytes dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The transmit-ready interrupt enable.
///
/// Enqueuing output enables it and wakes the transmit pump; the pump disables it again
/// once the transmit ring is empty.
#[derive(Default)]
pub struct TxReady {
    enabled: AtomicBool,
    notify: Notify,
}

impl TxReady {
    /// A disabled flag, shared between the channel and the transmit pump.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enable the interrupt and wake the pump.
    pub fn request(&self) {
        self.enabled.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Disable the interrupt (transmit ring drained).
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether output is pending.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Wait until output has been requested.
    pub async fn wait(&self) {
        if self.is_enabled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ring_keeps_old_bytes_and_drops_new() {
        let (mut prod, mut cons) = byte_ring(4);
        for b in b"abcd" {
            assert!(prod.push(*b));
        }
        assert!(!prod.push(b'x'));
        assert!(!prod.push(b'y'));
        assert_eq!(prod.dropped(), 2);

        let mut out = Vec::new();
        cons.drain_into(&mut out);
        assert_eq!(out, b"abcd");
        assert_eq!(cons.dropped(), 2);
    }

    #[test]
    fn push_all_counts_partial_store() {
        let (mut prod, cons) = byte_ring(3);
        assert_eq!(prod.push_all(b"hello"), 3);
        assert_eq!(prod.dropped(), 2);
        assert_eq!(cons.len(), 3);
    }

    #[test]
    fn free_len_tracks_buffered_bytes() {
        let (mut prod, mut cons) = byte_ring(6);
        assert_eq!(prod.free_len(), 6);
        prod.push_all(b"abcd");
        assert_eq!(prod.free_len(), 2);
        cons.pop();
        assert_eq!(prod.free_len(), 3);
        prod.count_dropped(7);
        assert_eq!(cons.dropped(), 7);
    }

    #[tokio::test]
    async fn tx_ready_wakes_waiter() {
        let ready = TxReady::new();
        let waiter = {
            let ready = ready.clone();
            tokio::spawn(async move { ready.wait().await })
        };
        ready.request();
        waiter.await.unwrap();
        assert!(ready.is_enabled());
        ready.disable();
        assert!(!ready.is_enabled());
    }
}
