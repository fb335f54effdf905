//! Snapshot data receiver. Pulls compressed chunks off the mailbox,
//! decompresses them into pooled buffers and queues them for the consumer.
//!
//! Per message: record the bytes against the stream pair, take one
//! decompressed and one compressed buffer (only once the message is in
//! hand), copy the payload in, decompress, queue the result. The compressed
//! buffer goes back to the pool at the end of every iteration; the
//! decompressed one travels with the queued chunk, or goes back on failure.
//!
//! Exit paths:
//!   - mailbox closes in order → `Ok(())`
//!   - shutdown signal → `Ok(())`, even mid-receive or mid-acquire
//!   - transport failure after `close()` → `Ok(())`
//!   - transport failure without `close()` → logged, `Err(Transport)`

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use rejoin_core::config::ReceiverConfig;
use rejoin_core::{Codec, CodecError, RejoinDataMessage, StreamPair};

use crate::buffer_pool::{BufferPool, PoolError, SizeClass};
use crate::chunk_queue::{ChunkQueue, DecodedChunk};
use crate::mailbox::Mailbox;
use crate::tracking::{TrackingEntry, TransferTracking};
use crate::watchdog::{Watchdog, WatchdogHandle};

/// Counters for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub messages: u64,
    pub compressed_bytes: u64,
    pub decompressed_bytes: u64,
    pub decode_failures: u64,
}

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    compressed_bytes: AtomicU64,
    decompressed_bytes: AtomicU64,
    decode_failures: AtomicU64,
}

struct Shared {
    queue: ChunkQueue,
    tracking: TransferTracking,
    pool: BufferPool,
    codec: Arc<dyn Codec>,
    config: ReceiverConfig,
    closed: AtomicBool,
    counters: Counters,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

/// Handle to one receiver. Clones share the same queue, tracking table
/// and closed flag.
#[derive(Clone)]
pub struct SnapshotDataReceiver {
    shared: Arc<Shared>,
}

impl SnapshotDataReceiver {
    pub fn new(pool: BufferPool, codec: Arc<dyn Codec>, config: ReceiverConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: ChunkQueue::new(),
                tracking: TransferTracking::new(),
                pool,
                codec,
                config,
                closed: AtomicBool::new(false),
                counters: Counters::default(),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Request shutdown. Idempotent and does not wait for the loop; a
    /// pending receive or acquire unblocks on transport closure or the
    /// shutdown signal. Also stops the watchdog.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("snapshot data receiver closed");
        }
        self.stop_watchdog();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Next decoded chunk, if any. Never blocks.
    pub fn poll(&self) -> Option<DecodedChunk> {
        self.shared.queue.poll()
    }

    /// Wait for the next decoded chunk. Cancel-safe.
    pub async fn take(&self) -> DecodedChunk {
        self.shared.queue.take().await
    }

    /// Current queue depth.
    pub fn size(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn tracking(&self) -> &TransferTracking {
        &self.shared.tracking
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub fn stats(&self) -> ReceiverStats {
        let c = &self.shared.counters;
        ReceiverStats {
            messages: c.messages.load(Ordering::Relaxed),
            compressed_bytes: c.compressed_bytes.load(Ordering::Relaxed),
            decompressed_bytes: c.decompressed_bytes.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
        }
    }

    /// Mark a pair's transfer finished and drop its tracking row.
    pub fn complete_stream(&self, pair: &StreamPair) -> Option<TrackingEntry> {
        let last = self.shared.tracking.forget(pair);
        if let Some(entry) = last {
            tracing::info!(pair = %pair, total = entry.bytes_total, "rejoin stream complete");
        }
        last
    }

    /// Start the stall watchdog on this receiver's tracking table. Replaces
    /// (and stops) any watchdog already running.
    pub fn spawn_watchdog(&self, period: Duration) {
        let handle = Watchdog::new(self.shared.tracking.clone(), period).spawn();
        let previous = self
            .shared
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn stop_watchdog(&self) {
        let handle = self
            .shared
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    pub fn watchdog_running(&self) -> bool {
        self.shared
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run the receive loop until the mailbox closes, fails, or `shutdown`
    /// fires. Dropping every shutdown sender also counts as shutdown.
    pub async fn run<M: Mailbox>(
        &self,
        mut mailbox: M,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ReceiveError> {
        tracing::info!(codec = self.shared.codec.name(), "receive loop started");

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("receive loop interrupted");
                    return Ok(());
                }
                received = mailbox.recv() => received,
            };

            let msg = match received {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::info!("mailbox closed, receive loop exiting");
                    return Ok(());
                }
                Err(e) => return self.transport_failed(e).await,
            };

            let pair = msg.pair();
            let decoded = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(pair = %pair, "receive loop interrupted while decoding");
                    return Ok(());
                }
                decoded = self.decode(msg) => decoded,
            };

            match decoded {
                Ok(chunk) => {
                    self.shared
                        .counters
                        .decompressed_bytes
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    self.shared.queue.offer(chunk);
                }
                Err(DecodeError::Pool(PoolError::Closed(class))) => {
                    tracing::debug!(class = class.name(), "buffer pool closed, receive loop exiting");
                    return Ok(());
                }
                Err(e) => {
                    self.shared
                        .counters
                        .decode_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(pair = %pair, error = %e, "dropping undecodable rejoin chunk");
                }
            }
        }
    }

    /// Decode one message into a chunk. Each buffer is released by its own
    /// guard on every early return, including cancellation.
    async fn decode(&self, msg: RejoinDataMessage) -> Result<DecodedChunk, DecodeError> {
        let shared = &self.shared;
        let pair = msg.pair();
        let len = msg.data.len() as u64;

        let entry = shared.tracking.record(pair, len);
        shared.counters.messages.fetch_add(1, Ordering::Relaxed);
        shared
            .counters
            .compressed_bytes
            .fetch_add(len, Ordering::Relaxed);
        tracing::trace!(
            pair = %pair,
            bytes = len,
            total = entry.bytes_total,
            "added bytes to transfer tracking"
        );

        let mut decompressed = shared.pool.acquire(SizeClass::Decompressed).await?;
        let mut compressed = shared.pool.acquire(SizeClass::Compressed).await?;

        compressed.fill_from(&msg.data)?;
        let n = shared
            .codec
            .decompress(compressed.as_slice(), decompressed.spare_mut())?;
        decompressed.set_len(n);
        compressed.release();

        Ok(DecodedChunk {
            source: msg.source,
            target: msg.target,
            payload: decompressed,
        })
    }

    async fn transport_failed(&self, err: io::Error) -> Result<(), ReceiveError> {
        // Let the consumer catch up so a close() racing the transport
        // teardown has a chance to land before the flag is read.
        let config = &self.shared.config;
        let deadline = Instant::now() + config.drain_timeout();
        while !self.shared.queue.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(config.drain_poll_interval()).await;
        }
        tokio::time::sleep(config.drain_grace()).await;

        if self.is_closed() {
            tracing::debug!(error = %err, "transport closed after close(), exiting quietly");
            return Ok(());
        }
        tracing::error!(error = %err, "error reading a message from a recovery stream");
        Err(ReceiveError::Transport(err))
    }
}

/// Failure that ends the receive loop.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("recovery stream transport failed: {0}")]
    Transport(#[source] io::Error),
}

/// Failure to decode one message. Never ends the loop on its own.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
