//! Per-worker buffer pool
//!
//! Each worker owns one pool. Buffers are checked out for the lifetime of
//! a partition transform and returned on drop. Checkouts that would push
//! the worker past its spill threshold are served from the host heap
//! outside the pool and counted as spills.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Statistics for a worker pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub worker: usize,
    /// Checkouts served by a recycled buffer
    pub hits: u64,
    /// Checkouts that needed a fresh pooled allocation
    pub misses: u64,
    /// Checkouts served outside the pool because of the spill threshold
    pub spills: u64,
    /// Bytes currently checked out of the pool
    pub in_use_bytes: usize,
    /// Bytes retained in free buffers
    pub retained_bytes: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A buffer that returns to its pool when dropped
pub struct PooledBuffer {
    data: Vec<f64>,
    /// Weak reference to the pool for return (avoids Arc cycle)
    pool: Option<Weak<MemoryPool>>,
    accounted_bytes: usize,
}

impl PooledBuffer {
    fn unpooled(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
            pool: None,
            accounted_bytes: 0,
        }
    }

    /// Whether this buffer came from the pool (false for spills)
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for PooledBuffer {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(weak) = self.pool.take() {
            if let Some(pool) = weak.upgrade() {
                let data = std::mem::take(&mut self.data);
                pool.return_buffer(data, self.accounted_bytes);
            }
        }
    }
}

/// Pooled arena owned by one worker
pub struct MemoryPool {
    worker: usize,
    /// Upper bound on bytes retained in free buffers
    pool_size_bytes: usize,
    /// Checked-out bytes above which new requests spill
    spill_threshold_bytes: usize,
    free: Mutex<Vec<Vec<f64>>>,
    retained_bytes: AtomicUsize,
    in_use_bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    spills: AtomicU64,
}

impl MemoryPool {
    pub fn new(worker: usize, pool_size_bytes: usize, spill_threshold_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            worker,
            pool_size_bytes,
            spill_threshold_bytes,
            free: Mutex::new(Vec::new()),
            retained_bytes: AtomicUsize::new(0),
            in_use_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            spills: AtomicU64::new(0),
        })
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Check out a zeroed buffer of `len` values
    pub fn get_buffer(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let bytes = len * F64_BYTES;
        let in_use = self.in_use_bytes.load(Ordering::Relaxed);
        if in_use + bytes > self.spill_threshold_bytes {
            self.spills.fetch_add(1, Ordering::Relaxed);
            debug!(worker = self.worker, bytes, in_use, "pool over spill threshold, using host allocation");
            return PooledBuffer::unpooled(len);
        }
        self.in_use_bytes.fetch_add(bytes, Ordering::Relaxed);

        let recycled = {
            let mut free = self.free.lock();
            free.iter()
                .position(|buf| buf.capacity() >= len)
                .map(|pos| free.swap_remove(pos))
        };

        let data = match recycled {
            Some(mut data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.retained_bytes
                    .fetch_sub(data.capacity() * F64_BYTES, Ordering::Relaxed);
                data.clear();
                data.resize(len, 0.0);
                data
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                vec![0.0; len]
            }
        };

        PooledBuffer {
            data,
            pool: Some(Arc::downgrade(self)),
            accounted_bytes: bytes,
        }
    }

    fn return_buffer(&self, data: Vec<f64>, accounted_bytes: usize) {
        self.in_use_bytes.fetch_sub(accounted_bytes, Ordering::Relaxed);
        let capacity_bytes = data.capacity() * F64_BYTES;
        let mut free = self.free.lock();
        if self.retained_bytes.load(Ordering::Relaxed) + capacity_bytes <= self.pool_size_bytes {
            self.retained_bytes.fetch_add(capacity_bytes, Ordering::Relaxed);
            free.push(data);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker: self.worker,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            spills: self.spills.load(Ordering::Relaxed),
            in_use_bytes: self.in_use_bytes.load(Ordering::Relaxed),
            retained_bytes: self.retained_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_recycled() {
        let pool = MemoryPool::new(0, 1 << 20, 1 << 20);
        {
            let mut buf = pool.get_buffer(100);
            buf[0] = 4.0;
            assert!(buf.is_pooled());
        }
        let buf = pool.get_buffer(50);
        assert_eq!(buf.len(), 50);
        assert_eq!(buf[0], 0.0);

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.in_use_bytes, 50 * F64_BYTES);
    }

    #[test]
    fn test_spill_over_threshold() {
        let pool = MemoryPool::new(1, 1 << 20, 1000 * F64_BYTES);
        let _held = pool.get_buffer(800);
        let spilled = pool.get_buffer(400);
        assert!(!spilled.is_pooled());
        assert_eq!(spilled.len(), 400);
        assert_eq!(pool.stats().spills, 1);
    }

    #[test]
    fn test_retained_bytes_bounded_by_pool_size() {
        let pool = MemoryPool::new(0, 10 * F64_BYTES, 1 << 20);
        drop(pool.get_buffer(100));
        let stats = pool.stats();
        assert_eq!(stats.retained_bytes, 0);
        assert_eq!(stats.in_use_bytes, 0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = PoolStats { hits: 3, misses: 1, ..Default::default() };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-12);
    }
}
