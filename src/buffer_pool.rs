//! Lock-free pool of reusable byte buffers.
//!
//! Body interception and batch encoding both need a scratch buffer per
//! call. [`BufferPool`] hands out [`PooledBuffer`] guards backed by a
//! `crossbeam` `ArrayQueue`; the buffer is cleared and returned to the pool
//! when the guard drops, so a buffer can never outlive its borrowing scope.
//! One pool is created per middleware instance and shared through `Arc`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Number of buffers kept for reuse.
pub const DEFAULT_POOL_SIZE: usize = 32;

/// Initial capacity of freshly allocated buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

pub struct BufferPool {
    queue: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
    max_retained_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    /// Creates a pool holding up to `pool_size` buffers.
    ///
    /// Buffers that grew beyond `max_retained_capacity` while borrowed are
    /// dropped instead of pooled, which caps the memory kept alive by
    /// oversized bodies.
    #[must_use]
    pub fn new(pool_size: usize, buffer_capacity: usize, max_retained_capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(pool_size.max(1)),
            buffer_capacity,
            max_retained_capacity: max_retained_capacity.max(buffer_capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Pool sized for bodies up to `ceiling` bytes.
    #[must_use]
    pub fn for_ceiling(ceiling: usize) -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY, ceiling)
    }

    /// Borrows a buffer. Allocates when the pool is empty.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = if let Some(buf) = self.queue.pop() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            buf
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            BytesMut::with_capacity(self.buffer_capacity)
        };
        PooledBuffer { buf, pool: self }
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained_capacity {
            return;
        }
        buf.clear();
        // Pool full: let the buffer drop.
        let _ = self.queue.push(buf);
    }

    /// Buffers currently idle in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish_non_exhaustive()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer<'a> {
    buf: BytesMut,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
