//! Recording observer for asserting on session lifecycle events.

use std::sync::{Arc, Mutex};

use tickload::{SessionEvent, SessionObserver};

/// Captures every event a session emits, in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(u64, SessionEvent)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<(u64, SessionEvent)> {
        self.events.lock().unwrap().clone()
    }

    /// Count events matching the predicate.
    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| pred(event))
            .count()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, session: u64, event: &SessionEvent) {
        self.events.lock().unwrap().push((session, event.clone()));
    }
}
