//! Monitoring push bus
//!
//! Broadcast channel carrying classified probe results and registry events
//! from the engine to live subscribers. The WebSocket layer in
//! [`crate::api::ws`] turns these into client-facing envelopes with
//! per-connection subscription filters.

pub mod bus;
pub mod errors;
pub mod streaming;
pub mod types;

pub use bus::{BusMetrics, MonitorEventBus, DEFAULT_BUS_CAPACITY};
pub use errors::EventBusError;
pub use streaming::FilteredReceiver;
pub use types::MonitorEvent;
