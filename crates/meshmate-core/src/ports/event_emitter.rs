//! Event emitter port.
//!
//! Implementations handle transport details (host callbacks, channels, logs).

use std::sync::{Arc, Mutex};

use crate::events::CoreEvent;

/// Trait for emitting core events.
///
/// # Implementations
///
/// - `NoopEmitter` - for tests and contexts without a listener
/// - `RecordingEmitter` - keeps events in memory for assertions
/// - Host adapters that forward to a UI
pub trait CoreEventEmitter: Send + Sync {
    /// Emit an event. Must not block.
    fn emit(&self, event: CoreEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl CoreEventEmitter for NoopEmitter {
    fn emit(&self, _event: CoreEvent) {}
}

/// Keeps every emitted event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<CoreEvent>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    pub fn events(&self) -> Vec<CoreEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl CoreEventEmitter for RecordingEmitter {
    fn emit(&self, event: CoreEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectionState;

    #[test]
    fn test_recording_emitter_shares_state_across_clones() {
        let emitter = RecordingEmitter::new();
        let clone = emitter.clone();
        clone.emit(CoreEvent::state_changed("echo", ConnectionState::Connecting));
        NoopEmitter::new().emit(CoreEvent::state_changed("echo", ConnectionState::Connected));

        assert_eq!(emitter.events().len(), 1);
        assert_eq!(emitter.events()[0].server(), Some("echo"));
    }
}
