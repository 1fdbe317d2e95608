//! pulsecheck: continuous endpoint health monitoring engine
//!
//! The engine keeps a registry of monitored URLs, schedules concurrent
//! probes (lightweight HTTP checks and deep headless-browser inspections),
//! classifies every outcome into a closed status taxonomy, persists results
//! with bounded per-URL history, and fans classified results out to live
//! WebSocket subscribers.

pub mod api;
pub mod browser_probe;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http_probe;
pub mod model;
pub mod monitor_events;
pub mod registry;
pub mod scheduler;
pub mod url_store;

pub use api::{AppState, build_router};
pub use browser_probe::{BrowserProber, BrowserSupervisor};
pub use classifier::{ErrorDetails, UrlStatus, classify, error_details};
pub use config::EngineConfig;
pub use dispatcher::{ProbeDispatcher, Prober};
pub use error::{EngineError, EngineResult};
pub use http_probe::HttpProber;
pub use model::{
    AuthConfig, AuthView, BrowserLoginConfig, MonitoredUrl, NewUrl, ProbeOutcome, ProbeResult,
    UrlGroup, UrlPatch,
};
pub use monitor_events::{MonitorEvent, MonitorEventBus};
pub use registry::RegistryService;
pub use scheduler::Scheduler;
pub use url_store::{UrlFilter, UrlStore, normalize_url};
