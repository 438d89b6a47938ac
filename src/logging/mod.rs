//! Log pipeline: `tracing` events captured into a bounded ring and fanned
//! out live to subscribers.
//!
//! [`init`] installs the process subscriber: an `EnvFilter`, a console `fmt`
//! layer (text or JSON) and a [`HubLayer`] feeding the process [`hub`]. The
//! control plane reads history with [`recent`] and streams with
//! [`subscribe`].

mod bus;
mod event;
mod layer;
mod ring;

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

pub use bus::{DEFAULT_SUBSCRIBER_BUFFER, LogBus, LogSubscription};
pub use event::LogEvent;
pub use layer::HubLayer;
pub use ring::{DEFAULT_RING_CAPACITY, LogRing};

/// Ring plus bus, fed from one serialization per event.
#[derive(Debug)]
pub struct LogHub {
    ring: LogRing,
    bus: LogBus,
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl LogHub {
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: LogRing::new(ring_capacity),
            bus: LogBus::new(),
        }
    }

    /// Serializes `event` once, stores it and broadcasts it.
    pub fn publish(&self, event: &LogEvent) {
        let line: Arc<str> = Arc::from(event.to_line());
        self.ring.push(Arc::clone(&line));
        self.bus.publish(&line);
    }

    /// Newest `limit` lines in emission order (`0` = all).
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Arc<str>> {
        self.ring.recent(limit)
    }

    /// Adds a live subscriber.
    #[must_use]
    pub fn subscribe(&self, buffer: usize) -> (mpsc::Receiver<Arc<str>>, LogSubscription) {
        self.bus.subscribe(buffer)
    }

    #[must_use]
    pub fn ring(&self) -> &LogRing {
        &self.ring
    }

    #[must_use]
    pub fn bus(&self) -> &LogBus {
        &self.bus
    }
}

static HUB: OnceLock<Arc<LogHub>> = OnceLock::new();

/// The process hub.
pub fn hub() -> Arc<LogHub> {
    Arc::clone(HUB.get_or_init(|| Arc::new(LogHub::default())))
}

/// Newest `limit` lines of the process hub.
#[must_use]
pub fn recent(limit: usize) -> Vec<Arc<str>> {
    hub().recent(limit)
}

/// Subscribes to the process hub with the default queue size.
#[must_use]
pub fn subscribe() -> (mpsc::Receiver<Arc<str>>, LogSubscription) {
    hub().subscribe(DEFAULT_SUBSCRIBER_BUFFER)
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. `format` is `json` for
/// JSON console output; anything else selects text.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init(default_level: &str, format: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = format.trim().eq_ignore_ascii_case("json");

    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(HubLayer::new(hub()))
        .try_init()
}
