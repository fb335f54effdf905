//! rejoind: receives rejoin snapshot streams over TCP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use rejoin_core::config::RejoinConfig;
use rejoin_core::{Codec, ZstdCodec};
use rejoin_services::{BufferPool, SnapshotDataReceiver, TcpMailbox};

mod consumer;
mod status;

use consumer::{AppliedLedger, ChunkConsumer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RejoinConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RejoinConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RejoinConfig::default()
    });

    let listen_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.listen_addr.clone());
    tracing::info!(%listen_addr, "rejoind starting");

    // Receiver
    let codec: Arc<dyn Codec> = Arc::new(ZstdCodec::default());
    let pool = BufferPool::new(&config.pool, codec.as_ref());
    tracing::info!(
        codec = codec.name(),
        decompressed_buffers = config.pool.decompressed_buffers,
        compressed_buffers = config.pool.compressed_buffers,
        buffer_len = config.pool.decompressed_buffer_len,
        "buffer pool ready"
    );
    let receiver = SnapshotDataReceiver::new(pool, codec, config.receiver.clone());

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            receiver.close();
            let _ = shutdown.send(());
        });
    }

    let mailbox = TcpMailbox::bind(
        listen_addr.as_str(),
        config.network.inbound_backlog,
        receiver.tracking().clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .with_context(|| format!("failed to bind rejoin listener on {listen_addr}"))?;
    let connections = mailbox.connections();

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    receiver.spawn_watchdog(config.watchdog.period());

    let receive_task = {
        let receiver = receiver.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { receiver.run(mailbox, shutdown).await })
    };

    let ledger = AppliedLedger::new();
    let mut consumer_task = tokio::spawn(
        ChunkConsumer::new(receiver.clone(), ledger.clone(), shutdown_tx.subscribe()).run(),
    );

    let connection_printer = {
        let connections = connections.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                tracing::info!(
                    connections = connections.len(),
                    queued = receiver.size(),
                    streams = receiver.tracking().len(),
                    "receiver snapshot"
                );
                for c in connections.iter() {
                    tracing::info!(
                        peer = %c.peer,
                        messages = c.messages,
                        bytes = c.bytes,
                        "  connection"
                    );
                }
            }
        })
    };

    if config.network.status_port != 0 {
        let state = status::StatusState {
            receiver: receiver.clone(),
            connections: connections.clone(),
            ledger: ledger.clone(),
        };
        let port = config.network.status_port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, port, shutdown).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = receive_task => match r {
            Ok(Ok(())) => tracing::info!("receive loop finished"),
            Ok(Err(e)) => tracing::error!(error = %e, "receive loop failed"),
            Err(e) => tracing::error!(error = %e, "receive task panicked"),
        },
        r = &mut consumer_task => tracing::error!("chunk consumer exited: {:?}", r),
        r = connection_printer => tracing::error!("connection printer exited: {:?}", r),
    }

    receiver.close();
    let _ = shutdown_tx.send(());

    // Give the consumer a moment to apply and release what is still queued.
    if !consumer_task.is_finished()
        && tokio::time::timeout(Duration::from_secs(5), consumer_task)
            .await
            .is_err()
    {
        tracing::warn!(queued = receiver.size(), "chunk consumer did not drain in time");
    }
    Ok(())
}
