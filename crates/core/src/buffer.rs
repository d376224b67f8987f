use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::metrics::Metrics;

/// Fixed-capacity memory leased from a [`BufferPool`].
///
/// A lease tracks how many of its bytes hold data (`len`) separately from its
/// capacity. Dropping the lease returns the memory to the pool.
///
/// # Example
/// ```rust
/// use hwimg_core::prelude::BufferPool;
///
/// let pool = BufferPool::new(1, 8);
/// let mut lease = pool.try_lease().unwrap();
/// assert_eq!(lease.fill_from(b"hello, world"), 8);
/// assert_eq!(lease.as_slice(), b"hello, w");
/// assert!(pool.try_lease().is_none());
/// drop(lease);
/// assert_eq!(pool.outstanding(), 0);
/// ```
pub struct BufferLease {
    pool: Arc<PoolInner>,
    buf: Option<Vec<u8>>,
    len: usize,
}

impl BufferLease {
    /// The filled bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self.buf.as_deref() {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// The whole backing store, filled or not.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    /// Number of filled bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed size of the backing store.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Mark the first `len` bytes as filled, capped at the capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    /// Copy as much of `src` as fits; returns the bytes taken.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.capacity());
        if let Some(buf) = self.buf.as_mut() {
            buf[..n].copy_from_slice(&src[..n]);
        }
        self.len = n;
        n
    }

    /// Forget the filled bytes.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.recycle(buf);
        }
    }
}

/// A fixed set of equally sized buffers, as allocated on a hardware port.
///
/// Unlike a general allocator the pool never grows: once `count` leases are
/// out, [`BufferPool::try_lease`] returns `None`. [`BufferPool::outstanding`]
/// reports how many leases are alive so owners can verify every buffer came
/// back before releasing the port.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Preallocate `count` buffers of `buffer_size` bytes each.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; buffer_size]).collect();
        let metrics = Metrics::default();
        for _ in 0..count {
            metrics.alloc();
        }
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buffer_size,
                count,
                leased: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Take a free buffer, or `None` if all are leased.
    pub fn try_lease(&self) -> Option<BufferLease> {
        let buf = self.inner.free.lock().pop();
        match buf {
            Some(buf) => {
                self.inner.metrics.hit();
                self.inner.leased.fetch_add(1, Ordering::AcqRel);
                Some(BufferLease {
                    pool: self.inner.clone(),
                    buf: Some(buf),
                    len: 0,
                })
            }
            None => {
                self.inner.metrics.miss();
                None
            }
        }
    }

    /// Leases currently alive.
    pub fn outstanding(&self) -> usize {
        self.inner.leased.load(Ordering::Acquire)
    }

    /// Number of buffers the pool was created with.
    pub fn count(&self) -> usize {
        self.inner.count
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Counters for this pool.
    pub fn metrics(&self) -> BufferPoolMetrics {
        BufferPoolMetrics {
            hits: self.inner.metrics.hits(),
            misses: self.inner.metrics.misses(),
            allocations: self.inner.metrics.allocations(),
            outstanding: self.outstanding(),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("count", &self.inner.count)
            .field("buffer_size", &self.inner.buffer_size)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferPoolMetrics {
    pub hits: u64,
    pub misses: u64,
    pub allocations: u64,
    pub outstanding: usize,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    count: usize,
    leased: AtomicUsize,
    metrics: Metrics,
}

impl PoolInner {
    fn recycle(&self, buf: Vec<u8>) {
        self.leased.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded() {
        let pool = BufferPool::new(2, 16);
        let a = pool.try_lease().unwrap();
        let _b = pool.try_lease().unwrap();
        assert!(pool.try_lease().is_none());
        assert_eq!(pool.outstanding(), 2);
        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.try_lease().is_some());
        let m = pool.metrics();
        assert_eq!(m.hits, 3);
        assert_eq!(m.misses, 1);
        assert_eq!(m.allocations, 2);
    }

    #[test]
    fn fill_is_capped_by_capacity() {
        let pool = BufferPool::new(1, 4);
        let mut lease = pool.try_lease().unwrap();
        assert_eq!(lease.fill_from(&[1, 2]), 2);
        assert_eq!(lease.as_slice(), &[1, 2]);
        lease.set_len(10);
        assert_eq!(lease.len(), 4);
        lease.clear();
        assert!(lease.is_empty());
        assert_eq!(lease.capacity(), 4);
    }

    #[test]
    fn leases_outlive_pool_handle() {
        let lease = {
            let pool = BufferPool::new(1, 4);
            pool.try_lease().unwrap()
        };
        assert_eq!(lease.capacity(), 4);
    }
}
