use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use jex_events_core::Event;

use super::{EventNotifier, NotifyError};

/// Keeps every routed event in memory. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    routed: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `route` fail (without recording) while `true`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn routed(&self) -> Vec<Event> {
        self.routed
            .lock()
            .map(|routed| routed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn route(&self, event: &Event) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("recording notifier set to fail".to_string()));
        }
        self.routed
            .lock()
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_until_switched_to_fail() {
        let notifier = RecordingNotifier::new();
        let event = Event {
            event_number: "001".to_string(),
            ..Event::default()
        };

        notifier.route(&event).await.unwrap();
        notifier.set_failing(true);
        assert!(notifier.route(&event).await.is_err());

        assert_eq!(notifier.routed(), vec![event]);
    }
}
