use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};

const DEFAULT_POOL_SIZE: usize = 256;
/// Buffers that grew past this are dropped instead of recycled.
const MAX_RETAINED_CAPACITY: usize = 1 << 20;

/// Lock-free pool of encode buffers shared by all worker threads.
pub struct BufPool {
    queue: ArrayQueue<Vec<u8>>,
}

impl Default for BufPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl BufPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Hands out an empty buffer owned exclusively by the returned guard.
    /// It goes back to the pool when the guard drops.
    pub fn get(&self) -> PooledBuf<'_> {
        let mut buf = self.queue.pop().unwrap_or_default();
        buf.clear();
        PooledBuf { pool: self, buf }
    }

    pub fn put(&self, buf: Vec<u8>) {
        if buf.capacity() <= MAX_RETAINED_CAPACITY {
            // A full pool just lets the buffer drop.
            let _ = self.queue.push(buf);
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.queue.len()
    }
}

pub struct PooledBuf<'a> {
    pool: &'a BufPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}
