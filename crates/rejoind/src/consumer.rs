//! Drains decoded chunks off the receiver and applies them.
//!
//! The daemon has no partition storage of its own, so applying a chunk means
//! accounting for it per stream pair. Each chunk's pooled buffer goes back
//! to the pool as soon as it has been applied.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::broadcast;

use rejoin_core::StreamPair;
use rejoin_services::{DecodedChunk, SnapshotDataReceiver};

#[derive(Debug, Clone, Copy)]
pub struct AppliedEntry {
    pub chunks: u64,
    pub bytes: u64,
    pub last_applied: Instant,
}

/// Per-pair totals of applied chunks. Cloning is cheap.
#[derive(Clone, Default)]
pub struct AppliedLedger {
    entries: Arc<DashMap<StreamPair, AppliedEntry>>,
}

impl AppliedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, chunk: &DecodedChunk) {
        let bytes = chunk.len() as u64;
        self.entries
            .entry(chunk.pair())
            .and_modify(|e| {
                e.chunks += 1;
                e.bytes += bytes;
                e.last_applied = Instant::now();
            })
            .or_insert(AppliedEntry {
                chunks: 1,
                bytes,
                last_applied: Instant::now(),
            });
    }

    pub fn get(&self, pair: &StreamPair) -> Option<AppliedEntry> {
        self.entries.get(pair).map(|e| *e)
    }

    pub fn remove(&self, pair: &StreamPair) -> Option<AppliedEntry> {
        self.entries.remove(pair).map(|(_, e)| e)
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.bytes).sum()
    }
}

pub struct ChunkConsumer {
    receiver: SnapshotDataReceiver,
    ledger: AppliedLedger,
    shutdown: broadcast::Receiver<()>,
}

impl ChunkConsumer {
    pub fn new(
        receiver: SnapshotDataReceiver,
        ledger: AppliedLedger,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            receiver,
            ledger,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let mut drained = 0usize;
                    while let Some(chunk) = self.receiver.poll() {
                        self.apply(chunk);
                        drained += 1;
                    }
                    tracing::info!(
                        drained,
                        applied_bytes = self.ledger.total_bytes(),
                        "chunk consumer shutting down"
                    );
                    return Ok(());
                }

                chunk = self.receiver.take() => self.apply(chunk),
            }
        }
    }

    fn apply(&self, chunk: DecodedChunk) {
        self.ledger.apply(&chunk);
        tracing::debug!(
            pair = %chunk.pair(),
            bytes = chunk.len(),
            queued = self.receiver.size(),
            "applied rejoin chunk"
        );
        chunk.release();
    }
}
