//! Dispatcher behavior: single-flight coalescing, the timeout envelope,
//! FRESH substitution, bounded history, and version-conflict retries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulsecheck::classifier::UrlStatus;
use pulsecheck::dispatcher::{ProbeDispatcher, Prober};
use pulsecheck::model::{MonitoredUrl, ProbeOutcome};
use pulsecheck::monitor_events::{MonitorEvent, MonitorEventBus};
use pulsecheck::registry::RegistryService;
use pulsecheck::url_store::HISTORY_LIMIT;

use common::{add_entry, build_engine, StaticProber};

#[tokio::test]
async fn concurrent_dispatches_share_one_probe() {
    let prober = StaticProber::with_delay(
        ProbeOutcome::http(200, 120, None),
        Duration::from_millis(200),
    );
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let entry = add_entry(&engine.registry, "https://api.example.com/health", "HealthAPI").await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let dispatcher = Arc::clone(&engine.dispatcher);
        let id = entry.id.clone();
        handles.push(tokio::spawn(async move { dispatcher.dispatch(&id).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    // Exactly one prober invocation; five identical outcomes.
    assert_eq!(engine.prober.invocations(), 1);
    for result in &results {
        assert_eq!(result.url_id, entry.id);
        assert_eq!(result.status, results[0].status);
        assert_eq!(result.latency_ms, results[0].latency_ms);
        assert_eq!(result.checked_at, results[0].checked_at);
    }

    // The slot is released afterwards: a new dispatch probes again.
    assert_eq!(engine.dispatcher.in_flight_count(), 0);
    engine.dispatcher.dispatch(&entry.id).await.unwrap();
    assert_eq!(engine.prober.invocations(), 2);
}

#[tokio::test]
async fn overlapping_check_all_coalesces_per_entry() {
    let prober = StaticProber::with_delay(
        ProbeOutcome::http(200, 50, None),
        Duration::from_millis(200),
    );
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    for (url, name) in [
        ("https://one.example.com", "One"),
        ("https://two.example.com", "Two"),
        ("https://three.example.com", "Three"),
    ] {
        add_entry(&engine.registry, url, name).await;
    }

    // Two back-to-back sweeps overlap; per entry only one probe runs.
    let (first, second) = tokio::join!(
        engine.dispatcher.dispatch_all(),
        engine.dispatcher.dispatch_all(),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(engine.prober.invocations(), 3);
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);

    for result in &first {
        let twin = second
            .iter()
            .find(|r| r.url_id == result.url_id)
            .expect("same entry in both sweeps");
        assert_eq!(twin.checked_at, result.checked_at);
        assert_eq!(twin.status, result.status);
    }
}

#[tokio::test]
async fn first_success_is_fresh_then_up() {
    let prober = StaticProber::new(ProbeOutcome::http(200, 120, None));
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let entry = add_entry(&engine.registry, "https://api.example.com/health", "HealthAPI").await;

    let first = engine.dispatcher.dispatch(&entry.id).await.unwrap();
    assert_eq!(first.status, UrlStatus::Fresh);
    assert_eq!(first.latency_ms, 120);

    let second = engine.dispatcher.dispatch(&entry.id).await.unwrap();
    assert_eq!(second.status, UrlStatus::Up);

    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert_eq!(stored.history, vec![120, 120]);
    assert_eq!(stored.status, UrlStatus::Up);
    assert!(stored.last_checked.is_some());
}

#[tokio::test]
async fn history_stays_bounded_across_many_probes() {
    let prober = StaticProber::new(ProbeOutcome::http(200, 80, None));
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let entry = add_entry(&engine.registry, "https://api.example.com", "Bounded").await;

    for _ in 0..(HISTORY_LIMIT + 5) {
        engine.dispatcher.dispatch(&entry.id).await.unwrap();
    }

    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert_eq!(stored.history.len(), HISTORY_LIMIT);
    assert!(stored.history.iter().all(|&sample| sample == 80));
}

#[tokio::test]
async fn envelope_expiry_synthesizes_timeout() {
    let prober = StaticProber::with_delay(
        ProbeOutcome::http(200, 10, None),
        Duration::from_secs(30),
    );
    let engine = build_engine(prober, Duration::from_millis(200)).await;
    let entry = add_entry(&engine.registry, "https://slow.example.com", "Slow").await;

    let result = engine.dispatcher.dispatch(&entry.id).await.unwrap();
    assert_eq!(result.status, UrlStatus::Timeout);
    assert!(result.persisted);

    let stored = engine.store.find_by_id(&entry.id).await.unwrap();
    assert_eq!(stored.status, UrlStatus::Timeout);
}

#[tokio::test]
async fn status_transition_emits_status_change() {
    let prober = StaticProber::new(ProbeOutcome::http(503, 80, None));
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let entry = add_entry(&engine.registry, "https://down.example.com", "Down").await;

    let mut events = engine.bus.subscribe();
    let result = engine.dispatcher.dispatch(&entry.id).await.unwrap();
    assert_eq!(result.status, UrlStatus::Down);

    // First a status_change (FRESH -> DOWN), then the monitoring_update.
    match events.recv().await.unwrap() {
        MonitorEvent::StatusChange { url_id, old_status, new_status, .. } => {
            assert_eq!(url_id, entry.id);
            assert_eq!(old_status, UrlStatus::Fresh);
            assert_eq!(new_status, UrlStatus::Down);
        }
        other => panic!("expected status_change, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        MonitorEvent::MonitoringUpdate { data } => {
            assert_eq!(data.url_id, entry.id);
            assert_eq!(data.status, UrlStatus::Down);
            assert!(data.persisted);
        }
        other => panic!("expected monitoring_update, got {other:?}"),
    }
}

#[tokio::test]
async fn removed_entry_probe_is_a_noop_but_still_emits() {
    let prober = StaticProber::with_delay(
        ProbeOutcome::http(200, 40, None),
        Duration::from_millis(300),
    );
    let engine = build_engine(prober, Duration::from_secs(5)).await;
    let entry = add_entry(&engine.registry, "https://gone.example.com", "Gone").await;

    let dispatcher = Arc::clone(&engine.dispatcher);
    let id = entry.id.clone();
    let probe = tokio::spawn(async move { dispatcher.dispatch(&id).await });

    // Remove the entry while its probe is in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.registry.remove_url(&entry.id).await.unwrap();

    let result = probe.await.unwrap().unwrap();
    assert!(!result.persisted, "persistence must become a no-op");
    assert!(engine.store.find_by_id(&entry.id).await.is_err());
}

/// A prober that bumps the entry's version mid-probe, forcing the
/// dispatcher's persistence into the version-conflict retry path.
struct VersionBumpingProber {
    store: pulsecheck::url_store::UrlStore,
}

#[async_trait]
impl Prober for VersionBumpingProber {
    async fn probe(&self, target: &MonitoredUrl, _deadline: Duration) -> ProbeOutcome {
        let mut entry = self.store.find_by_id(&target.id).await.unwrap();
        entry.description = Some("changed mid-probe".into());
        self.store.update_entry(&entry).await.unwrap();
        ProbeOutcome::http(200, 60, None)
    }
}

#[tokio::test]
async fn version_conflict_retries_to_success() {
    let (dir, store) = common::open_temp_store().await;
    let bus = MonitorEventBus::default();
    let conflicting = Arc::new(VersionBumpingProber { store: store.clone() });
    let dispatcher = ProbeDispatcher::with_probers(
        store.clone(),
        bus.clone(),
        conflicting.clone(),
        conflicting,
        Duration::from_secs(5),
    );
    let registry = RegistryService::new(store.clone(), Arc::clone(&dispatcher), bus, false);
    let entry = add_entry(&registry, "https://racy.example.com", "Racy").await;

    let result = dispatcher.dispatch(&entry.id).await.unwrap();
    assert!(result.persisted, "retry should absorb the stale version");

    let stored = store.find_by_id(&entry.id).await.unwrap();
    // One config bump from the prober plus one probe write.
    assert_eq!(stored.version, entry.version + 2);
    assert_eq!(stored.history, vec![60]);
    assert_eq!(stored.description.as_deref(), Some("changed mid-probe"));
    drop(dir);
}
