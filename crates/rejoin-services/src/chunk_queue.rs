//! Decoded-chunk queue — unbounded FIFO handoff from the receive loop to
//! whoever applies chunks to storage.
//!
//! The queue itself never pushes back on the producer. The decompressed
//! buffer class of the pool does: every queued chunk holds one of its
//! buffers until the consumer drops it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use rejoin_core::{HsId, StreamPair};

use crate::buffer_pool::PooledBuffer;

/// One decompressed snapshot chunk.
///
/// Owns its pooled buffer exclusively. Dropping the chunk (or calling
/// [`release`](Self::release)) returns the buffer to the pool.
#[derive(Debug)]
pub struct DecodedChunk {
    pub source: HsId,
    pub target: HsId,
    pub payload: PooledBuffer,
}

impl DecodedChunk {
    pub fn pair(&self) -> StreamPair {
        StreamPair::new(self.source, self.target)
    }

    /// The decompressed bytes, bounded by the valid length.
    pub fn data(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Hand the buffer back to the pool.
    pub fn release(self) {
        drop(self);
    }
}

#[derive(Default)]
pub struct ChunkQueue {
    items: Mutex<VecDeque<DecodedChunk>>,
    available: Notify,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DecodedChunk>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Never blocks.
    pub fn offer(&self, chunk: DecodedChunk) {
        self.lock().push_back(chunk);
        self.available.notify_one();
    }

    /// Next chunk if one is queued.
    pub fn poll(&self) -> Option<DecodedChunk> {
        self.lock().pop_front()
    }

    /// Wait for the next chunk.
    ///
    /// Cancel-safe: a dropped `take` never loses a chunk.
    pub async fn take(&self) -> DecodedChunk {
        loop {
            if let Some(chunk) = self.poll() {
                return chunk;
            }
            self.available.notified().await;
        }
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
