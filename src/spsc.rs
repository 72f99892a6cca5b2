//! Bounded lock-free single-producer single-consumer ring buffer.
//!
//! The engine's only shared mutable state. Capacity is rounded up to a
//! power of two so indices wrap with a mask. The producer publishes with a
//! release store; the consumer observes with an acquire load. Each half
//! caches the other's last seen index so the fast path touches one atomic.
//!
//! Contract: exactly one thread pushes, exactly one thread pops. The halves
//! are `Send` but not `Clone`, so the type system enforces it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct Cursor(AtomicUsize);

struct Inner<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next write position (owned by the producer).
    head: Cursor,
    /// Next read position (owned by the consumer).
    tail: Cursor,
}

unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Sole owner at this point; drain whatever was published but not
        // consumed.
        let head = *self.head.0.get_mut();
        let mut tail = *self.tail.0.get_mut();
        while tail != head {
            unsafe { (*self.buf[tail].get()).assume_init_drop() };
            tail = (tail + 1) & self.mask;
        }
    }
}

/// Producer half. Owned by exactly one thread.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
    cached_tail: usize,
}

/// Consumer half. Owned by exactly one thread.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
    cached_head: usize,
}

/// Create a queue holding up to `capacity` items (rounded up to the next
/// power of two; one slot stays empty to distinguish full from empty).
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let mut cap = 1usize;
    while cap < capacity.max(2) {
        cap <<= 1;
    }
    let buf = (0..cap)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(Inner {
        buf,
        mask: cap - 1,
        head: Cursor(AtomicUsize::new(0)),
        tail: Cursor(AtomicUsize::new(0)),
    });
    (
        Producer { inner: Arc::clone(&inner), cached_tail: 0 },
        Consumer { inner, cached_head: 0 },
    )
}

impl<T> Producer<T> {
    /// Non-blocking push. Returns the item back when the queue is full;
    /// the caller decides between dropping and retrying.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let inner = &*self.inner;
        let head = inner.head.0.load(Ordering::Relaxed);
        let next = (head + 1) & inner.mask;
        if next == self.cached_tail {
            self.cached_tail = inner.tail.0.load(Ordering::Acquire);
            if next == self.cached_tail {
                return Err(item);
            }
        }
        unsafe { (*inner.buf[head].get()).write(item) };
        inner.head.0.store(next, Ordering::Release);
        Ok(())
    }

    /// Rounded power-of-two capacity.
    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}

impl<T> Consumer<T> {
    /// Non-blocking pop. `None` means empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let inner = &*self.inner;
        let tail = inner.tail.0.load(Ordering::Relaxed);
        if tail == self.cached_head {
            self.cached_head = inner.head.0.load(Ordering::Acquire);
            if tail == self.cached_head {
                return None;
            }
        }
        let item = unsafe { (*inner.buf[tail].get()).assume_init_read() };
        inner.tail.0.store((tail + 1) & inner.mask, Ordering::Release);
        Some(item)
    }

    /// Approximate occupancy; telemetry only.
    pub fn approx_len(&self) -> usize {
        let inner = &*self.inner;
        let head = inner.head.0.load(Ordering::Acquire);
        let tail = inner.tail.0.load(Ordering::Acquire);
        (head.wrapping_sub(tail)) & inner.mask
    }
}
