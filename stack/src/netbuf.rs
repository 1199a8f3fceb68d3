/// Bounded packet buffer pool.
///
/// Every frame or packet the stack handles lives in a `NetBuf` taken from a
/// `NetBufPool`. The pool only counts slots: the bytes are heap-allocated on
/// `alloc` and freed with the buffer. Dropping a `NetBuf` returns its slot,
/// so the in-use counter doubles as the allocation tracker in tests.
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::net::NetError;

struct PoolInner {
    capacity: usize,
    in_use: AtomicUsize,
}

#[derive(Clone)]
pub struct NetBufPool {
    inner: Arc<PoolInner>,
}

impl NetBufPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// A zero-filled buffer of `len` bytes.
    pub fn alloc(&self, len: usize) -> Result<NetBuf, NetError> {
        self.reserve()?;
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
            return Err(NetError::NoMemory);
        }
        data.resize(len, 0);
        Ok(NetBuf {
            data,
            pool: self.clone(),
        })
    }

    /// A buffer holding a copy of `bytes`.
    pub fn from_slice(&self, bytes: &[u8]) -> Result<NetBuf, NetError> {
        let mut buf = self.alloc(bytes.len())?;
        buf.as_mut_slice().copy_from_slice(bytes);
        Ok(buf)
    }

    fn reserve(&self) -> Result<(), NetError> {
        let inner = &self.inner;
        let mut used = inner.in_use.load(Ordering::Acquire);
        loop {
            if used >= inner.capacity {
                log::warn!(target: "netif", "[netbuf] pool exhausted ({} buffers)", inner.capacity);
                return Err(NetError::NoMemory);
            }
            match inner.in_use.compare_exchange_weak(
                used,
                used + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => used = actual,
            }
        }
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// One packet. Owns its bytes and one pool slot.
pub struct NetBuf {
    data: Vec<u8>,
    pool: NetBufPool,
}

impl NetBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop `n` bytes from the front (a consumed header).
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    /// Drop trailing bytes beyond `len` (link-layer padding).
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

impl Drop for NetBuf {
    fn drop(&mut self) {
        self.pool.inner.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for NetBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBuf").field("len", &self.data.len()).finish()
    }
}
