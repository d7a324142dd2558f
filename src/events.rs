// =============================================================================
// Event bus — synchronous in-process fan-out of runtime events
// =============================================================================
//
// Delivery is synchronous on the publishing thread; sinks must not block.
// The bus carries journal-shaped JSON objects so any event can be persisted
// or logged without a second schema.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::journal::JournalWriter;

/// Receiver of published events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Value);
}

/// In-process event bus.
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn publish(&self, event: &Value) {
        for sink in self.sinks.read().iter() {
            sink.on_event(event);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Standard sinks
// ---------------------------------------------------------------------------

/// Persists every published event to the journal.
pub struct JournalSink {
    journal: Arc<JournalWriter>,
}

impl JournalSink {
    pub fn new(journal: Arc<JournalWriter>) -> Self {
        Self { journal }
    }
}

impl EventSink for JournalSink {
    fn on_event(&self, event: &Value) {
        self.journal.write_event(event.clone());
    }
}

/// Mirrors events into the tracing stream at debug level.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: &Value) {
        debug!(event = %event, "bus event");
    }
}
