//! The discovery source abstraction (spec.md §4.1) and a registry that
//! tracks per-source availability and cadence.

use crate::model::SourceState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A pluggable discovery source. `fetch` stamps `lastFetchTime` at its
/// *start*, spawns a producer task, and returns the receiving end of a
/// bounded channel the producer closes on completion or cancellation.
pub trait Source: Send + Sync {
    fn name(&self) -> String;

    fn fetch(&self, cancel: CancellationToken) -> mpsc::Receiver<String>;

    fn available(&self) -> bool;

    fn due_for_fetch(&self) -> bool;
}

/// Shared bookkeeping embedded (by composition, not inheritance) into
/// every concrete source: name, availability, last-fetch stamp.
pub struct SourceBase {
    pub state: Mutex<SourceState>,
}

impl SourceBase {
    pub fn new(name: impl Into<String>, cadence: Duration) -> Self {
        Self {
            state: Mutex::new(SourceState::new(name, cadence)),
        }
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn available(&self) -> bool {
        self.state.lock().available
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn due_for_fetch(&self) -> bool {
        self.state.lock().due_for_fetch()
    }

    pub fn stamp_fetch_start(&self) {
        self.state.lock().stamp_fetch_start();
    }
}

/// Registers the enabled sources for a scheduling round.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    /// Sources that are available and due, in registration order.
    pub fn due_sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources
            .iter()
            .filter(|s| s.available() && s.due_for_fetch())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }
}
