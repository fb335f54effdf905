//! Byte accounting and per-pair ordering.

use rejoin_core::{HsId, RejoinDataMessage, StreamPair};
use rejoin_services::{mailbox, SizeClass, Watchdog};
use tokio::sync::broadcast;

use crate::{body, message, receiver};

fn pair(source: u32, target: u32) -> StreamPair {
    StreamPair::new(HsId::new(source, 0), HsId::new(target, 0))
}

#[tokio::test]
async fn totals_equal_sum_of_payload_lengths() {
    let rx = receiver(32, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    let msgs: Vec<RejoinDataMessage> = (0..20u8)
        .map(|seq| message(1, 2, seq, 100 + seq as usize * 37))
        .collect();
    let expected: u64 = msgs.iter().map(|m| m.data.len() as u64).sum();
    for m in &msgs {
        tx.send(m.clone()).unwrap();
    }
    drop(tx);

    rx.run(mb, shutdown).await.unwrap();

    let entry = rx.tracking().get(&pair(1, 2)).unwrap();
    assert_eq!(entry.bytes_total, expected);
    assert_eq!(entry.bytes_since_last_check, expected);
    assert_eq!(rx.stats().compressed_bytes, expected);
}

#[tokio::test]
async fn interval_counter_covers_only_bytes_since_watchdog_run() {
    let rx = receiver(32, 2);
    let watchdog = Watchdog::new(rx.tracking().clone(), std::time::Duration::from_secs(5));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (tx, mb) = mailbox::channel();
    let early = message(1, 2, 1, 300);
    tx.send(early.clone()).unwrap();
    drop(tx);
    rx.run(mb, shutdown_tx.subscribe()).await.unwrap();

    let report = watchdog.run_once();
    assert_eq!(report.progressed.len(), 1);

    let (tx, mb) = mailbox::channel();
    let late = message(1, 2, 2, 900);
    tx.send(late.clone()).unwrap();
    drop(tx);
    rx.run(mb, shutdown_tx.subscribe()).await.unwrap();

    let entry = rx.tracking().get(&pair(1, 2)).unwrap();
    assert_eq!(entry.bytes_since_last_check, late.data.len() as u64);
    assert_eq!(
        entry.bytes_total,
        (early.data.len() + late.data.len()) as u64
    );
}

#[tokio::test]
async fn per_pair_order_survives_interleaving() {
    let rx = receiver(64, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    // Three pairs, interleaved round-robin.
    for seq in 0..10u8 {
        for target in 2..5u32 {
            tx.send(message(1, target, seq, 64)).unwrap();
        }
    }
    drop(tx);
    rx.run(mb, shutdown).await.unwrap();

    let mut seen: std::collections::BTreeMap<u32, Vec<u8>> = Default::default();
    while let Some(chunk) = rx.poll() {
        assert_eq!(chunk.data(), &body(chunk.data()[0], 64)[..]);
        seen.entry(chunk.target.host_id())
            .or_default()
            .push(chunk.data()[0]);
    }
    for target in 2..5u32 {
        assert_eq!(seen[&target], (0..10u8).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn one_acquire_and_one_release_per_chunk() {
    let rx = receiver(16, 2);
    let (tx, mb) = mailbox::channel();
    let (_shutdown_tx, shutdown) = broadcast::channel::<()>(1);

    let mut good = 0u64;
    for seq in 0..12u8 {
        if seq % 4 == 3 {
            tx.send(RejoinDataMessage::new(
                HsId::new(1, 0),
                HsId::new(2, 0),
                vec![seq; 40],
            ))
            .unwrap();
        } else {
            tx.send(message(1, 2, seq, 256)).unwrap();
            good += 1;
        }
    }
    drop(tx);
    rx.run(mb, shutdown).await.unwrap();

    let pool = rx.pool().clone();
    assert_eq!(rx.size() as u64, good);
    assert_eq!(rx.stats().decode_failures, 12 - good);
    assert_eq!(pool.counts(SizeClass::Compressed), (12, 12));

    let (acquired, released) = pool.counts(SizeClass::Decompressed);
    assert_eq!(acquired, 12);
    assert_eq!(released, 12 - good);

    while let Some(chunk) = rx.poll() {
        chunk.release();
    }
    assert_eq!(pool.counts(SizeClass::Decompressed), (12, 12));
    assert_eq!(pool.available(SizeClass::Decompressed), 16);
}
