//! Test bus doubles: a recording `MessageBus` and a recording `EventHandler`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auctionhouse_core::bus::{BusError, EventHandler, HandleOutcome, MessageBus};
use auctionhouse_core::event::IntegrationEvent;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct BusState {
    published: Vec<IntegrationEvent>,
    subscriptions: Vec<String>,
    failures_remaining: u32,
}

/// A message bus that records every accepted event. It can be told to refuse
/// the next few publishes to simulate a broker outage.
#[derive(Debug, Default)]
pub struct RecordingBus {
    state: Mutex<BusState>,
}

impl RecordingBus {
    /// Creates a bus that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with `BusError::Unavailable`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().unwrap().failures_remaining = count;
    }

    /// Returns a snapshot of every accepted event, in acceptance order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<IntegrationEvent> {
        self.state.lock().unwrap().published.clone()
    }

    /// Returns the names of registered subscriptions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(BusError::Unavailable("broker connection refused".into()));
        }
        state.published.push(event.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &str,
        _event_types: &[&str],
        _handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push(subscription.to_owned());
        Ok(())
    }
}

/// An event handler that acknowledges and records every delivery.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<IntegrationEvent>>,
    notify: Notify,
}

impl RecordingHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every delivery received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn received(&self) -> Vec<IntegrationEvent> {
        self.received.lock().unwrap().clone()
    }

    /// Waits until at least `count` deliveries arrived or `timeout` elapsed.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.received().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &IntegrationEvent) -> HandleOutcome {
        self.received.lock().unwrap().push(event.clone());
        self.notify.notify_waiters();
        HandleOutcome::Ack
    }
}
