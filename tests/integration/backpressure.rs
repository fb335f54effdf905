//! The decompressed buffer class is the receiver's only backpressure.

use std::time::Duration;

use rejoin_services::{mailbox, SizeClass};
use tokio::sync::broadcast;

use crate::{eventually, message, receiver, CHUNK_LEN};

#[tokio::test]
async fn third_chunk_waits_for_consumer_take() {
    let rx = receiver(2, 2);
    let (tx, mb) = mailbox::channel();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let task = {
        let rx = rx.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { rx.run(mb, shutdown).await })
    };

    for seq in 0..3 {
        tx.send(message(1, 2, seq, CHUNK_LEN)).unwrap();
    }

    assert!(eventually(Duration::from_secs(2), || rx.size() == 2).await);
    // The third message has been received and tracked, but cannot get a buffer.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.size(), 2);
    assert_eq!(rx.pool().available(SizeClass::Decompressed), 0);
    assert_eq!(rx.stats().messages, 3);

    let first = rx.take().await;
    assert_eq!(first.data()[0], 0);
    first.release();

    assert!(
        eventually(Duration::from_secs(2), || rx.stats().decompressed_bytes
            == 3 * CHUNK_LEN as u64)
        .await,
        "third chunk should decode once a buffer is free"
    );
    assert_eq!(rx.size(), 2);

    let order: Vec<u8> = std::iter::from_fn(|| rx.poll()).map(|c| c.data()[0]).collect();
    assert_eq!(order, vec![1, 2]);

    drop(tx);
    task.await.unwrap().unwrap();
    assert_eq!(rx.pool().available(SizeClass::Decompressed), 2);
}

#[tokio::test]
async fn compressed_buffers_never_accumulate() {
    let rx = receiver(8, 1);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    for seq in 0..8 {
        tx.send(message(1, 2, seq, 512)).unwrap();
    }
    drop(tx);

    // A single compressed buffer is enough for any number of messages.
    rx.run(mb, shutdown).await.unwrap();
    assert_eq!(rx.size(), 8);
    assert_eq!(rx.pool().available(SizeClass::Compressed), 1);
    assert_eq!(rx.pool().counts(SizeClass::Compressed), (8, 8));
}
