//! Event routing from the upstream stream into the snapshot and progress state.

mod common;

use std::time::Duration;

use casestats_loader::Readiness;

use common::{eventually, ids, loader, FakeSource};

#[tokio::test(start_paused = true)]
async fn initial_load_reaches_ready_with_full_progress() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    loader.init().await.unwrap();
    assert_eq!(loader.readiness(), Readiness::Loading);
    assert!(!loader.probe_ok());

    conn.upsert("A", 10).upsert("B", 5).progress(2, 2).complete();
    loader.wait_until_ready().await.unwrap();

    assert!(loader.is_ready());
    assert_eq!(ids(&loader), vec!["A", "B"]);
    assert_eq!(loader.get("A").unwrap().age_days, 10);
    assert_eq!(loader.get("B").unwrap().age_days, 5);

    let progress = loader.progress();
    assert!(progress.complete);
    assert_eq!(progress.percentage, Some(100.0));
    assert_eq!(progress.expected_total, Some(2));
    assert_eq!(progress.received, 2);
    assert!(loader.probe_ok());

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn repeated_upsert_keeps_latest_value() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    loader.init().await.unwrap();

    conn.upsert("A", 10).upsert("A", 12);
    eventually("second upsert", || {
        loader.get("A").is_some_and(|r| r.age_days == 12)
    })
    .await;
    assert_eq!(loader.len(), 1);

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn upsert_then_delete_leaves_snapshot_empty() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    loader.init().await.unwrap();

    conn.upsert("A", 3).delete("A").complete();
    loader.wait_until_ready().await.unwrap();
    assert!(loader.is_empty());
    assert_eq!(loader.stats().applied, 2);

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_does_not_block_neighbours() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    loader.init().await.unwrap();

    conn.upsert("A", 1)
        .raw("upsert", r#"{"id":"BAD","age_days":"soon"}"#)
        .raw("upsert", "{not json")
        .raw("delete", "[]")
        .upsert("C", 3)
        .complete();
    loader.wait_until_ready().await.unwrap();

    assert_eq!(ids(&loader), vec!["A", "C"]);
    let stats = loader.stats();
    assert_eq!(stats.malformed, 3);
    assert_eq!(stats.applied, 2);

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_events_are_counted_and_skipped() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    loader.init().await.unwrap();

    conn.raw("message", "hello").raw("snapshot-v2", "{}").upsert("A", 1).complete();
    loader.wait_until_ready().await.unwrap();

    assert_eq!(ids(&loader), vec!["A"]);
    assert_eq!(loader.stats().ignored, 2);
    assert_eq!(loader.stats().malformed, 0);

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn buffered_burst_larger_than_batch_is_fully_applied() {
    let source = FakeSource::new();
    let conn = source.connection();
    for i in 0..50 {
        conn.upsert(&format!("C{i:02}"), i);
    }
    conn.progress(50, 50).complete();

    let loader = loader(&source);
    loader.init().await.unwrap();
    loader.wait_until_ready().await.unwrap();

    assert_eq!(loader.len(), 50);
    assert_eq!(loader.get("C49").unwrap().age_days, 49);
    assert_eq!(loader.progress().received, 50);

    loader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn progress_subscriber_follows_the_load() {
    let source = FakeSource::new();
    let conn = source.connection();
    let loader = loader(&source);
    let mut sub = loader.subscribe_progress();
    loader.init().await.unwrap();

    conn.progress(0, 4);
    for id in ["A", "B", "C", "D"] {
        conn.upsert(id, 1);
    }
    conn.complete();

    let mut seen = Vec::new();
    loop {
        let state = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("progress update")
            .expect("subscription open");
        seen.push(state);
        if state.complete {
            break;
        }
    }

    let last = seen.last().unwrap();
    assert_eq!(last.received, 4);
    assert_eq!(last.percentage, Some(100.0));
    let percentages: Vec<f64> = seen.iter().filter_map(|s| s.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");

    loader.shutdown().await.unwrap();
    assert_eq!(sub.recv().await, None);
}
