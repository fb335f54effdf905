//! Rejoin receiver integration tests.
//!
//! These run the receive loop end to end against in-process and loopback
//! TCP mailboxes. No external setup is needed:
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use rejoin_core::config::ReceiverConfig;
use rejoin_core::{Codec, HsId, RejoinDataMessage, ZstdCodec};
use rejoin_services::{BufferPool, SnapshotDataReceiver};

mod backpressure;
mod lifecycle;
mod ordering;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const CHUNK_LEN: usize = 4096;

/// Receiver over a zstd codec with `decompressed` chunk buffers and short
/// drain timings.
pub fn receiver(decompressed: usize, compressed: usize) -> SnapshotDataReceiver {
    let codec = Arc::new(ZstdCodec::default());
    let pool = BufferPool::with_classes(
        CHUNK_LEN,
        decompressed,
        codec.max_compressed_len(CHUNK_LEN),
        compressed,
    );
    SnapshotDataReceiver::new(pool, codec, fast_drain())
}

pub fn fast_drain() -> ReceiverConfig {
    ReceiverConfig {
        drain_poll_ms: 5,
        drain_grace_ms: 20,
        drain_timeout_ms: 500,
    }
}

/// Deterministic chunk body: `seq` repeated, so order is checkable after
/// decompression.
pub fn body(seq: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seq.wrapping_add((i % 7) as u8)).collect()
}

pub fn message(source: u32, target: u32, seq: u8, len: usize) -> RejoinDataMessage {
    let data = ZstdCodec::default()
        .compress(&body(seq, len))
        .expect("compress");
    RejoinDataMessage::new(HsId::new(source, 0), HsId::new(target, 0), data)
}

/// Poll `cond` until it holds or `within` passes.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
