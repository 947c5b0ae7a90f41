use std::sync::Mutex;

use stockroom_types::events::Envelope;

/// Where components send their domain events once a mutation has committed.
///
/// `publish` is called while the owning record is still locked so events for
/// one record leave in the order they were applied. Implementations must
/// never block.
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: Envelope);
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _envelope: Envelope) {}
}

/// Keeps every published envelope in memory, for tests and tooling.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Envelope> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, envelope: Envelope) {
        match self.events.lock() {
            Ok(mut events) => events.push(envelope),
            Err(poisoned) => poisoned.into_inner().push(envelope),
        }
    }
}
