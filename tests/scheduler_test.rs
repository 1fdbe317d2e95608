//! Scheduler behavior reachable without waiting out the startup deferral:
//! the opportunistic refresh path and shutdown draining.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pulsecheck::classifier::UrlStatus;
use pulsecheck::model::{NewUrl, ProbeOutcome, UrlPatch};
use pulsecheck::scheduler::Scheduler;

use common::{add_entry, build_engine, StaticProber};

#[tokio::test]
async fn stale_entries_are_redispatched_on_read() {
    let prober = StaticProber::new(ProbeOutcome::http(200, 25, None));
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let scheduler = Scheduler::new(
        engine.store.clone(),
        Arc::clone(&engine.dispatcher),
        Duration::from_secs(300),
    );

    let entry = add_entry(&engine.registry, "https://stale.example.com", "Stale").await;

    // Never checked → stale → redispatched in the background.
    let entries = engine.store.find_all(&Default::default()).await.unwrap();
    scheduler.refresh_stale(&entries);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = engine.store.find_by_id(&entry.id).await.unwrap();
            if current.last_checked.is_some() {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("opportunistic probe should land");

    assert_eq!(engine.prober.invocations(), 1);

    // Just checked → inside the freshness window → no second dispatch.
    let entries = engine.store.find_all(&Default::default()).await.unwrap();
    scheduler.refresh_stale(&entries);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.prober.invocations(), 1);

    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert_eq!(stored.status, UrlStatus::Fresh);
}

#[tokio::test]
async fn disabled_entries_are_never_refreshed() {
    let prober = StaticProber::new(ProbeOutcome::http(200, 25, None));
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let scheduler = Scheduler::new(
        engine.store.clone(),
        Arc::clone(&engine.dispatcher),
        Duration::from_secs(300),
    );

    let entry = engine
        .registry
        .add_url(NewUrl {
            url: "https://off.example.com".into(),
            name: Some("Off".into()),
            enabled: Some(false),
            ..NewUrl::default()
        })
        .await
        .unwrap();

    let entries = engine.store.find_all(&Default::default()).await.unwrap();
    scheduler.refresh_stale(&entries);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.prober.invocations(), 0);
    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert!(stored.last_checked.is_none());
}

#[tokio::test]
async fn stop_waits_for_in_flight_probes() {
    let prober = StaticProber::with_delay(
        ProbeOutcome::http(200, 30, None),
        Duration::from_millis(300),
    );
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let scheduler = Scheduler::new(
        engine.store.clone(),
        Arc::clone(&engine.dispatcher),
        Duration::from_secs(300),
    );
    scheduler.start().await;

    let entry = add_entry(&engine.registry, "https://busy.example.com", "Busy").await;
    let entries = engine.store.find_all(&Default::default()).await.unwrap();
    scheduler.refresh_stale(&entries);

    // Give the spawned probe a moment to claim its slot, then stop: the
    // drain should let it finish and persist.
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop().await;

    assert_eq!(engine.dispatcher.in_flight_count(), 0);
    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert!(stored.last_checked.is_some());

    // A config update still works after shutdown; the engine is quiescent,
    // not broken.
    engine
        .registry
        .update_url(&entry.id, UrlPatch { description: Some("post-stop".into()), ..UrlPatch::default() })
        .await
        .unwrap();
}
