//! UART/DMA byte source.
//!
//! Received bytes land in a fixed circular arena written by the DMA engine
//! (the interrupt side in production, the simulated peer in tests). Only an
//! index pair crosses the interrupt/thread boundary: the producer advances a
//! write index, and the consumer thread diffs it against the position of its
//! last drain to compute the newly arrived byte range; wraparound becomes
//! two sub-ranges. No payload copying happens in interrupt context.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RingInner {
    arena: Mutex<Box<[u8]>>,
    write_pos: AtomicUsize,
    capacity: usize,
}

/// Circular DMA receive buffer.
///
/// Cloning is cheap; all clones share the same arena. The consumer side uses
/// [`write_index`](DmaRing::write_index) and [`read_range`](DmaRing::read_range),
/// the producer side goes through [`DmaProducer`].
#[derive(Clone)]
pub struct DmaRing {
    inner: Arc<RingInner>,
}

impl DmaRing {
    /// Create a ring with the given arena capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            inner: Arc::new(RingInner {
                arena: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
                write_pos: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Current write position, i.e. `capacity - dma_remaining_count()` on
    /// real hardware.
    pub fn write_index(&self) -> usize {
        self.inner.write_pos.load(Ordering::Acquire)
    }

    /// Hand out the producer half (the interrupt/DMA side).
    pub fn producer(&self) -> DmaProducer {
        DmaProducer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Feed the byte range `[from, write_index)` to `consume`, handling
    /// wraparound as two sub-ranges. Returns the new read position.
    pub fn read_range(&self, from: usize, mut consume: impl FnMut(&[u8])) -> usize {
        let to = self.write_index();
        if to == from {
            return from;
        }
        let arena = self.inner.arena.lock();
        if to > from {
            consume(&arena[from..to]);
        } else {
            consume(&arena[from..]);
            consume(&arena[..to]);
        }
        to
    }
}

/// Producer half of the [`DmaRing`]: writes bytes and advances the write
/// index, emulating what the DMA engine does on real hardware.
#[derive(Clone)]
pub struct DmaProducer {
    inner: Arc<RingInner>,
}

impl DmaProducer {
    /// Copy bytes into the arena at the current write position.
    pub fn write(&self, bytes: &[u8]) {
        let capacity = self.inner.capacity;
        let mut arena = self.inner.arena.lock();
        let mut pos = self.inner.write_pos.load(Ordering::Relaxed);
        for &byte in bytes {
            arena[pos] = byte;
            pos = (pos + 1) % capacity;
        }
        self.inner.write_pos.store(pos, Ordering::Release);
    }
}

/// Wake-up channel from the interrupt context to the engine thread.
///
/// [`notify`](RxNotifier::notify) never blocks: the queue is bounded at one
/// entry and duplicate notifications are coalesced while the engine is
/// behind. It is purely a wake-up, not a data channel; the data lives in
/// the [`DmaRing`].
#[derive(Clone)]
pub struct RxNotifier {
    tx: Sender<()>,
}

impl RxNotifier {
    /// Create the notifier and the receiver the engine thread waits on.
    pub fn channel() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Signal that new bytes may have arrived. Safe to call from interrupt
    /// context; never blocks.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}
