//! Receive buffer pooling.
//!
//! Connection workers borrow their receive buffer from a shared pool. The
//! buffer goes back to the pool when the [`PooledBuffer`] guard is dropped,
//! on every exit path of the worker.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A thread-safe pool of equally sized byte buffers.
pub struct BufferPool {
    pool: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_pool_size: usize,
}

impl BufferPool {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `buffer_size` - Size of each buffer in bytes
    /// * `max_pool_size` - Maximum number of idle buffers kept for reuse
    pub fn new(buffer_size: usize, max_pool_size: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(max_pool_size)),
            buffer_size,
            max_pool_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Takes a buffer from the pool, allocating one if the pool is empty.
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .pool
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    fn put(&self, buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            return;
        }
        let mut pool = self.pool.lock();
        if pool.len() < self.max_pool_size {
            pool.push(buffer);
        }
    }

    /// Number of idle buffers.
    pub fn size(&self) -> usize {
        self.pool.lock().len()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.put(buffer);
    }
}
