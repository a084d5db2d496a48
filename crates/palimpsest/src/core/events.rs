//! Progress event fan-out.
//!
//! Subscribers get an unbounded receiver; emission never blocks orchestration
//! work. A subscriber that drops its receiver is pruned on the next emit;
//! there is no delivery guarantee after unsubscribing.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::types::ProgressEvent;

/// Cloneable handle to the event stream shared by every orchestration stage.
#[derive(Debug, Clone, Default)]
pub struct ProgressBus {
    subscribers: Arc<parking_lot::Mutex<Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, dropping dead ones.
    pub fn emit(&self, event: ProgressEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
