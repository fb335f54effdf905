//! Shutdown, close and transport failure paths.

use std::io;
use std::time::Duration;

use rejoin_core::{HsId, StreamPair};
use rejoin_services::{mailbox, ReceiveError, SizeClass};
use tokio::sync::broadcast;

use crate::{eventually, message, receiver};

#[tokio::test]
async fn close_then_transport_failure_exits_quietly() {
    let rx = receiver(4, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    let task = {
        let rx = rx.clone();
        tokio::spawn(async move { rx.run(mb, shutdown).await })
    };

    tx.send(message(1, 2, 0, 128)).unwrap();
    assert!(eventually(Duration::from_secs(1), || rx.size() == 1).await);

    rx.close();
    tx.fail(io::Error::new(io::ErrorKind::ConnectionAborted, "sender went away"))
        .unwrap();

    // The loop waits for the queue to drain before it reads the flag.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!task.is_finished());
    drop(rx.poll());

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn close_racing_the_failure_is_still_quiet() {
    let rx = receiver(4, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    let task = {
        let rx = rx.clone();
        tokio::spawn(async move { rx.run(mb, shutdown).await })
    };

    // Failure lands first; close() arrives within the drain grace period.
    tx.fail(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        .unwrap();
    tokio::task::yield_now().await;
    rx.close();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn transport_failure_without_close_surfaces_error() {
    let rx = receiver(4, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    tx.send(message(1, 2, 0, 128)).unwrap();
    tx.fail(io::Error::new(io::ErrorKind::UnexpectedEof, "stream cut"))
        .unwrap();

    // Nobody drains the queue, so the drain wait runs to its timeout.
    let err = rx.run(mb, shutdown).await.unwrap_err();
    let ReceiveError::Transport(inner) = err;
    assert_eq!(inner.kind(), io::ErrorKind::UnexpectedEof);

    // The chunk decoded before the failure is still there for the consumer.
    assert_eq!(rx.size(), 1);
}

#[tokio::test]
async fn orderly_mailbox_closure_ends_loop_without_error() {
    let rx = receiver(4, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    tx.send(message(1, 2, 0, 64)).unwrap();
    drop(tx);

    rx.run(mb, shutdown).await.unwrap();
    assert_eq!(rx.size(), 1);
    assert!(!rx.is_closed());
}

#[tokio::test]
async fn shutdown_while_pool_exhausted_leaks_nothing() {
    let rx = receiver(1, 1);
    let (tx, mb) = mailbox::channel();
    let (shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    let task = {
        let rx = rx.clone();
        tokio::spawn(async move { rx.run(mb, shutdown).await })
    };
    for seq in 0..3 {
        tx.send(message(1, 2, seq, 64)).unwrap();
    }
    assert!(eventually(Duration::from_secs(1), || rx.size() == 1).await);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    while let Some(chunk) = rx.poll() {
        chunk.release();
    }
    let pool = rx.pool();
    for class in [SizeClass::Decompressed, SizeClass::Compressed] {
        let (acquired, released) = pool.counts(class);
        assert_eq!(acquired, released, "{} class leaked", class.name());
        assert_eq!(pool.available(class), pool.capacity(class));
    }
}

#[tokio::test(start_paused = true)]
async fn watchdog_follows_receiver_lifetime() {
    let rx = receiver(4, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    rx.spawn_watchdog(Duration::from_secs(5));
    tx.send(message(1, 2, 0, 64)).unwrap();
    drop(tx);
    rx.run(mb, shutdown).await.unwrap();

    let pair = StreamPair::new(HsId::new(1, 0), HsId::new(2, 0));
    assert!(rx.tracking().get(&pair).unwrap().bytes_since_last_check > 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(rx.tracking().get(&pair).unwrap().bytes_since_last_check, 0);

    rx.close();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!rx.watchdog_running());
}
