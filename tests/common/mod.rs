//! Test utilities and helper functions for the pulsecheck test suite

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use pulsecheck::dispatcher::{ProbeDispatcher, Prober};
use pulsecheck::model::{MonitoredUrl, NewUrl, ProbeOutcome};
use pulsecheck::monitor_events::MonitorEventBus;
use pulsecheck::registry::RegistryService;
use pulsecheck::url_store::UrlStore;

/// Open a store backed by a fresh temporary SQLite file. The TempDir must
/// outlive the store.
#[allow(dead_code)]
pub async fn open_temp_store() -> (TempDir, UrlStore) {
    let dir = TempDir::new().expect("create temp dir");
    let db_path = dir.path().join("pulsecheck-test.sqlite");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let store = UrlStore::open(&url).await.expect("open test store");
    (dir, store)
}

/// A prober returning a canned outcome after an optional delay, counting its
/// invocations. Stands in for both the HTTP and the browser prober.
pub struct StaticProber {
    outcome: ProbeOutcome,
    delay: Duration,
    invocations: AtomicUsize,
}

impl StaticProber {
    #[allow(dead_code)]
    pub fn new(outcome: ProbeOutcome) -> Arc<Self> {
        Self::with_delay(outcome, Duration::ZERO)
    }

    #[allow(dead_code)]
    pub fn with_delay(outcome: ProbeOutcome, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay,
            invocations: AtomicUsize::new(0),
        })
    }

    #[allow(dead_code)]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _target: &MonitoredUrl, _deadline: Duration) -> ProbeOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Everything a dispatcher-level test needs, wired around a canned prober.
#[allow(dead_code)]
pub struct TestEngine {
    pub dir: TempDir,
    pub store: UrlStore,
    pub bus: MonitorEventBus,
    pub dispatcher: Arc<ProbeDispatcher>,
    pub registry: RegistryService,
    pub prober: Arc<StaticProber>,
}

/// Build an engine whose HTTP and browser probers are both `prober`.
#[allow(dead_code)]
pub async fn build_engine(prober: Arc<StaticProber>, deadline: Duration) -> TestEngine {
    let (dir, store) = open_temp_store().await;
    let bus = MonitorEventBus::default();
    let dispatcher = ProbeDispatcher::with_probers(
        store.clone(),
        bus.clone(),
        prober.clone(),
        prober.clone(),
        deadline,
    );
    let registry = RegistryService::new(store.clone(), Arc::clone(&dispatcher), bus.clone(), false);
    TestEngine {
        dir,
        store,
        bus,
        dispatcher,
        registry,
        prober,
    }
}

/// Register a plain HTTP entry and return it.
#[allow(dead_code)]
pub async fn add_entry(registry: &RegistryService, url: &str, name: &str) -> MonitoredUrl {
    registry
        .add_url(NewUrl {
            url: url.to_string(),
            name: Some(name.to_string()),
            ..NewUrl::default()
        })
        .await
        .expect("register test url")
}
