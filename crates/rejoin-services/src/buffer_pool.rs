//! Fixed-capacity, size-classed buffer pool.
//!
//! Two classes: one for decompressed chunks, one for compressed wire chunks.
//! Every buffer is allocated up front. `acquire` waits while a class is
//! exhausted, which is the receiver's only real backpressure: when the
//! consumer holds every decompressed buffer, the receive loop stops pulling
//! from the transport.
//!
//! A [`PooledBuffer`] returns itself to the pool when dropped, so each
//! acquisition is released exactly once on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use rejoin_core::config::PoolConfig;
use rejoin_core::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Decompressed,
    Compressed,
}

impl SizeClass {
    pub fn name(self) -> &'static str {
        match self {
            SizeClass::Decompressed => "decompressed",
            SizeClass::Compressed => "compressed",
        }
    }
}

struct ClassPool {
    buffer_len: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    permits: Arc<Semaphore>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ClassPool {
    fn new(buffer_len: usize, capacity: usize) -> Self {
        let free = (0..capacity).map(|_| vec![0u8; buffer_len]).collect();
        Self {
            buffer_len,
            capacity,
            free: Mutex::new(free),
            permits: Arc::new(Semaphore::new(capacity)),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    fn give_back(&self, buf: Vec<u8>) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolInner {
    decompressed: ClassPool,
    compressed: ClassPool,
}

impl PoolInner {
    fn class(&self, class: SizeClass) -> &ClassPool {
        match class {
            SizeClass::Decompressed => &self.decompressed,
            SizeClass::Compressed => &self.compressed,
        }
    }
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Build a pool from config. A zero `compressed_buffer_len` is derived
    /// from the codec's worst-case bound for one decompressed buffer.
    pub fn new(config: &PoolConfig, codec: &dyn Codec) -> Self {
        let compressed_len = if config.compressed_buffer_len == 0 {
            codec.max_compressed_len(config.decompressed_buffer_len)
        } else {
            config.compressed_buffer_len
        };
        Self::with_classes(
            config.decompressed_buffer_len,
            config.decompressed_buffers,
            compressed_len,
            config.compressed_buffers,
        )
    }

    pub fn with_classes(
        decompressed_len: usize,
        decompressed_count: usize,
        compressed_len: usize,
        compressed_count: usize,
    ) -> Self {
        tracing::debug!(
            decompressed_len,
            decompressed_count,
            compressed_len,
            compressed_count,
            "buffer pool allocated"
        );
        Self {
            inner: Arc::new(PoolInner {
                decompressed: ClassPool::new(decompressed_len, decompressed_count),
                compressed: ClassPool::new(compressed_len, compressed_count),
            }),
        }
    }

    /// Take a buffer of the given class, waiting while none are free.
    ///
    /// Cancel-safe: dropping the future before it resolves holds no slot.
    pub async fn acquire(&self, class: SizeClass) -> Result<PooledBuffer, PoolError> {
        let pool = self.inner.class(class);
        let permit = pool
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed(class))?;

        let buf = pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; pool.buffer_len]);
        pool.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledBuffer {
            buf,
            len: 0,
            class,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Non-waiting variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self, class: SizeClass) -> Option<PooledBuffer> {
        let pool = self.inner.class(class);
        let permit = pool.permits.clone().try_acquire_owned().ok()?;
        let buf = pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; pool.buffer_len]);
        pool.acquired.fetch_add(1, Ordering::Relaxed);
        Some(PooledBuffer {
            buf,
            len: 0,
            class,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Fail all pending and future acquisitions. Buffers already handed out
    /// still return normally when dropped.
    pub fn close(&self) {
        self.inner.decompressed.permits.close();
        self.inner.compressed.permits.close();
    }

    /// Buffers currently free in a class.
    pub fn available(&self, class: SizeClass) -> usize {
        self.inner.class(class).permits.available_permits()
    }

    /// Total buffers in a class.
    pub fn capacity(&self, class: SizeClass) -> usize {
        self.inner.class(class).capacity
    }

    pub fn buffer_len(&self, class: SizeClass) -> usize {
        self.inner.class(class).buffer_len
    }

    /// Lifetime (acquired, released) counts for a class.
    pub fn counts(&self, class: SizeClass) -> (u64, u64) {
        let pool = self.inner.class(class);
        (
            pool.acquired.load(Ordering::Relaxed),
            pool.released.load(Ordering::Relaxed),
        )
    }
}

/// A buffer on loan from the pool, with an explicit valid-length bound.
///
/// Returned to its pool exactly once, when dropped.
pub struct PooledBuffer {
    buf: Vec<u8>,
    len: usize,
    class: SizeClass,
    pool: Arc<PoolInner>,
    // Dropped after `Drop::drop` has put the buffer back on the free list.
    _permit: OwnedSemaphorePermit,
}

impl PooledBuffer {
    pub fn class(&self) -> SizeClass {
        self.class
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the valid-length bound. Clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The whole buffer, for writers that report how much they filled.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Replace the contents with `data`. Fails without touching the buffer
    /// if `data` does not fit.
    pub fn fill_from(&mut self, data: &[u8]) -> Result<(), PoolError> {
        if data.len() > self.buf.len() {
            return Err(PoolError::TooLarge {
                class: self.class,
                len: data.len(),
                capacity: self.buf.len(),
            });
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(())
    }

    /// Return the buffer to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.class(self.class).give_back(buf);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("class", &self.class)
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("{} buffer pool is closed", .0.name())]
    Closed(SizeClass),

    #[error("{len} bytes do not fit in a {capacity}-byte {} buffer", .class.name())]
    TooLarge {
        class: SizeClass,
        len: usize,
        capacity: usize,
    },
}
