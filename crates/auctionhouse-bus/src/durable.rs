//! `MessageBus` over a durable delivery log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auctionhouse_core::bus::{BusError, DeadLetter, EventHandler, HandleOutcome, MessageBus, Nack};
use auctionhouse_core::clock::{Clock, after, before};
use auctionhouse_core::delivery::{Delivery, DeliveryRepository};
use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::IntegrationEvent;
use auctionhouse_core::retry::RetryPolicy;
use auctionhouse_core::rng::DeterministicRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Tuning for [`DurableBus`].
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Background consumers started per subscription. With `0` nothing is
    /// consumed until [`DurableBus::poll`] is called.
    pub workers: usize,
    /// Deliveries claimed per poll.
    pub batch_size: usize,
    /// Sleep between polls when a subscription has nothing due.
    pub poll_interval: Duration,
    /// How long a claimed delivery is hidden from other consumers.
    pub lease: Duration,
    /// Deliveries attempted before a transiently failing event is dead-lettered.
    pub max_deliveries: u32,
    /// Backoff between redeliveries.
    pub redelivery: RetryPolicy,
    /// How long acknowledged deliveries are kept.
    pub retention: Duration,
    /// How often acknowledged deliveries past retention are purged.
    pub purge_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 50,
            poll_interval: Duration::from_millis(200),
            lease: Duration::from_secs(30),
            max_deliveries: 5,
            redelivery: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(10),
            },
            retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Counts from one poll of a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Deliveries claimed.
    pub claimed: usize,
    /// Deliveries the handler acknowledged.
    pub acked: usize,
    /// Deliveries rescheduled after a transient failure.
    pub redelivery_scheduled: usize,
    /// Deliveries the subscription gave up on.
    pub dead_lettered: usize,
    /// Deliveries whose outcome could not be stored. They stay pending and are
    /// handed out again once their lease expires.
    pub unrecorded: usize,
}

struct Shared {
    repository: Arc<dyn DeliveryRepository>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn DeterministicRng>>,
    config: BusConfig,
}

impl Shared {
    fn jitter(&self) -> f64 {
        self.rng.lock().map_or(0.0, |mut rng| rng.next_f64())
    }

    #[instrument(skip(self, handler))]
    async fn poll(
        &self,
        subscription: &str,
        handler: &dyn EventHandler,
    ) -> Result<DeliveryReport, DomainError> {
        let now = self.clock.now();
        let deliveries = self
            .repository
            .claim_due(
                subscription,
                now,
                after(now, self.config.lease),
                self.config.batch_size,
            )
            .await?;

        let mut report = DeliveryReport {
            claimed: deliveries.len(),
            ..DeliveryReport::default()
        };
        for delivery in deliveries {
            let event_id = delivery.event.event_id;
            let outcome = match handler.handle(&delivery.event).await {
                HandleOutcome::Ack => self
                    .repository
                    .ack(subscription, event_id, self.clock.now())
                    .await
                    .map(|()| {
                        debug!(
                            subscription,
                            %event_id,
                            event_type = %delivery.event.event_type,
                            "event acknowledged"
                        );
                        report.acked += 1;
                    }),
                HandleOutcome::Nack(nack) => {
                    self.handle_nack(&delivery, nack).await.map(|dead_lettered| {
                        if dead_lettered {
                            report.dead_lettered += 1;
                        } else {
                            report.redelivery_scheduled += 1;
                        }
                    })
                }
            };
            if let Err(e) = outcome {
                error!(
                    subscription,
                    %event_id,
                    event_type = %delivery.event.event_type,
                    error = %e,
                    "could not record delivery outcome"
                );
                report.unrecorded += 1;
            }
        }
        Ok(report)
    }

    /// Returns `true` if the delivery was dead-lettered.
    async fn handle_nack(&self, delivery: &Delivery, nack: Nack) -> Result<bool, DomainError> {
        let deliveries = delivery.deliveries.saturating_add(1);
        let deliveries_u32 = u32::try_from(deliveries).unwrap_or(u32::MAX);
        let event = &delivery.event;

        let reason = match nack {
            Nack::Transient(reason) if deliveries_u32 < self.config.max_deliveries => {
                let delay = self.config.redelivery.delay_for(deliveries_u32, self.jitter());
                let next_attempt_at = after(self.clock.now(), delay);
                self.repository
                    .schedule_redelivery(
                        &delivery.subscription,
                        event.event_id,
                        deliveries,
                        next_attempt_at,
                        &reason,
                    )
                    .await?;
                warn!(
                    subscription = %delivery.subscription,
                    event_id = %event.event_id,
                    deliveries,
                    reason = %reason,
                    %next_attempt_at,
                    "delivery failed, redelivery scheduled"
                );
                return Ok(false);
            }
            Nack::Transient(reason) | Nack::Permanent(reason) => reason,
        };

        self.repository
            .dead_letter(
                &delivery.subscription,
                event.event_id,
                deliveries,
                &reason,
                self.clock.now(),
            )
            .await?;
        error!(
            subscription = %delivery.subscription,
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            deliveries,
            reason = %reason,
            "event dead-lettered"
        );
        Ok(true)
    }

    async fn purge_expired(&self, subscription: &str) {
        let cutoff = before(self.clock.now(), self.config.retention);
        match self.repository.purge_acked(subscription, cutoff).await {
            Ok(0) => {}
            Ok(purged) => info!(subscription, purged, %cutoff, "purged acknowledged deliveries"),
            Err(e) => error!(subscription, error = %e, "delivery purge failed"),
        }
    }
}

/// A message bus whose accepted events live in a [`DeliveryRepository`].
///
/// `publish` returns once the event is stored as one pending delivery per
/// matching durable subscription. Consumers claim due deliveries, oldest first
/// per aggregate, and settle each one as acknowledged, scheduled for
/// redelivery or dead-lettered. Pending deliveries and dead letters outlive the
/// process; a subscription registered again under the same name picks up where
/// the previous process stopped.
pub struct DurableBus {
    shared: Arc<Shared>,
    handlers: Mutex<HashMap<String, Arc<dyn EventHandler>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl DurableBus {
    /// Creates an open bus with no local subscriptions.
    #[must_use]
    pub fn new(
        repository: Arc<dyn DeliveryRepository>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        config: BusConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                repository,
                clock,
                rng: Mutex::new(rng),
                config: BusConfig {
                    batch_size: config.batch_size.max(1),
                    max_deliveries: config.max_deliveries.max(1),
                    ..config
                },
            }),
            handlers: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Claims and handles one batch of due deliveries for a local subscription.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Rejected` if this bus has no handler registered under
    /// `subscription`, and `BusError::Unavailable` if deliveries cannot be
    /// claimed. A failure to store a single delivery's outcome is logged and
    /// counted instead.
    pub async fn poll(&self, subscription: &str) -> Result<DeliveryReport, BusError> {
        let handler = self
            .handlers
            .lock()
            .map_err(|_| BusError::Unavailable("handler table poisoned".into()))?
            .get(subscription)
            .cloned()
            .ok_or_else(|| BusError::Rejected(format!("unknown subscription {subscription}")))?;

        self.shared
            .poll(subscription, handler.as_ref())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    /// Returns every event any subscription gave up on, including those dead-
    /// lettered by earlier processes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the delivery log cannot be read.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError> {
        self.shared.repository.dead_letters().await
    }

    /// Stops accepting events and waits for the background consumers. A
    /// delivery being handled finishes first; everything not yet acknowledged
    /// stays pending in the delivery log.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        let workers = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "bus consumer terminated abnormally");
            }
        }
        info!("message bus closed");
    }
}

impl std::fmt::Debug for DurableBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBus")
            .field("config", &self.shared.config)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Polls one subscription until `shutdown` turns `true` or its sender is
/// dropped. Polls repeat immediately while they make progress, since settling
/// a delivery can make the next one of the same aggregate due.
async fn consume(
    shared: Arc<Shared>,
    subscription: String,
    handler: Arc<dyn EventHandler>,
    mut shutdown: watch::Receiver<bool>,
    purges: bool,
) {
    debug!(subscription, "bus consumer started");
    let mut next_purge = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let progressed = match shared.poll(&subscription, handler.as_ref()).await {
            Ok(report) => report.acked > 0 || report.dead_lettered > 0,
            Err(e) => {
                error!(subscription, error = %e, "delivery poll failed");
                false
            }
        };

        if purges && Instant::now() >= next_purge {
            shared.purge_expired(&subscription).await;
            next_purge = Instant::now() + shared.config.purge_interval;
        }

        if progressed {
            continue;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep(shared.config.poll_interval) => {}
        }
    }
    debug!(subscription, "bus consumer stopped");
}

#[async_trait]
impl MessageBus for DurableBus {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus is closed".into()));
        }
        let queued = self
            .shared
            .repository
            .enqueue(event, self.shared.clock.now())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            queued,
            "event published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &str,
        event_types: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Rejected("bus is closed".into()));
        }
        let taken = self
            .handlers
            .lock()
            .map_err(|_| BusError::Unavailable("handler table poisoned".into()))?
            .contains_key(subscription);
        if taken {
            return Err(BusError::Rejected(format!(
                "subscription {subscription} already exists"
            )));
        }

        self.shared
            .repository
            .register_subscription(subscription, event_types, self.shared.clock.now())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        {
            let mut handlers = self
                .handlers
                .lock()
                .map_err(|_| BusError::Unavailable("handler table poisoned".into()))?;
            if handlers.contains_key(subscription) {
                return Err(BusError::Rejected(format!(
                    "subscription {subscription} already exists"
                )));
            }
            handlers.insert(subscription.to_owned(), Arc::clone(&handler));
        }

        let handles: Vec<JoinHandle<()>> = (0..self.shared.config.workers)
            .map(|worker| {
                tokio::spawn(consume(
                    Arc::clone(&self.shared),
                    subscription.to_owned(),
                    Arc::clone(&handler),
                    self.shutdown.subscribe(),
                    worker == 0,
                ))
            })
            .collect();
        if let Ok(mut workers) = self.workers.lock() {
            workers.extend(handles);
        }

        info!(subscription, ?event_types, "subscription registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use auctionhouse_core::delivery::DeliveryStatus;
    use auctionhouse_test_support::{InMemoryDeliveryStore, ManualClock, MockRng, RecordingHandler};
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn config(max_deliveries: u32) -> BusConfig {
        BusConfig {
            workers: 0,
            max_deliveries,
            redelivery: RetryPolicy {
                max_attempts: max_deliveries,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            ..BusConfig::default()
        }
    }

    fn bus(
        store: &Arc<InMemoryDeliveryStore>,
        clock: &Arc<ManualClock>,
        max_deliveries: u32,
    ) -> DurableBus {
        DurableBus::new(
            store.clone(),
            clock.clone(),
            Box::new(MockRng),
            config(max_deliveries),
        )
    }

    fn event(event_type: &str, aggregate_id: Uuid, sequence_number: i64) -> IntegrationEvent {
        IntegrationEvent {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            schema_version: 1,
            aggregate_type: "auction".to_owned(),
            aggregate_id,
            sequence_number,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: start(),
            payload: serde_json::json!({ "id": aggregate_id }),
        }
    }

    /// Polls until nothing due is left.
    async fn drain(bus: &DurableBus, subscription: &str) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        loop {
            let report = bus.poll(subscription).await.unwrap();
            if report.claimed == 0 {
                return total;
            }
            total.claimed += report.claimed;
            total.acked += report.acked;
            total.redelivery_scheduled += report.redelivery_scheduled;
            total.dead_lettered += report.dead_lettered;
            total.unrecorded += report.unrecorded;
        }
    }

    /// Drains, then steps the clock past any redelivery backoff, repeatedly.
    async fn settle(bus: &DurableBus, clock: &ManualClock, subscription: &str) {
        for _ in 0..10 {
            drain(bus, subscription).await;
            clock.advance(chrono::Duration::minutes(1));
        }
    }

    /// Fails transiently a fixed number of times, then acknowledges.
    struct FlakyHandler {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn failing(times: u32) -> Self {
            Self {
                failures: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        async fn handle(&self, _event: &IntegrationEvent) -> HandleOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                HandleOutcome::Nack(Nack::Transient("database busy".into()))
            } else {
                HandleOutcome::Ack
            }
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl EventHandler for RejectingHandler {
        async fn handle(&self, _event: &IntegrationEvent) -> HandleOutcome {
            HandleOutcome::Nack(Nack::Permanent("unsupported schema".into()))
        }
    }

    #[tokio::test]
    async fn test_events_of_one_aggregate_arrive_in_publish_order() {
        // Arrange
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        let handler = Arc::new(RecordingHandler::new());
        bus.subscribe("search", &["AuctionUpdated"], handler.clone())
            .await
            .unwrap();
        let aggregate_id = Uuid::new_v4();

        // Act
        for sequence in 1..=20 {
            bus.publish(&event("AuctionUpdated", aggregate_id, sequence))
                .await
                .unwrap();
        }
        let report = drain(&bus, "search").await;

        // Assert
        assert_eq!(report.acked, 20);
        let sequences: Vec<i64> = handler
            .received()
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(sequences, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_only_subscribed_event_types_are_delivered() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        let handler = Arc::new(RecordingHandler::new());
        bus.subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();

        bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1))
            .await
            .unwrap();
        bus.publish(&event("BidPlaced", Uuid::new_v4(), 1))
            .await
            .unwrap();
        drain(&bus, "search").await;

        let received = handler.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type, "AuctionCreated");
        assert_eq!(store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_every_subscription_gets_its_own_copy() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        let search = Arc::new(RecordingHandler::new());
        let notifications = Arc::new(RecordingHandler::new());
        bus.subscribe("search", &["AuctionCreated"], search.clone())
            .await
            .unwrap();
        bus.subscribe("notifications", &["AuctionCreated"], notifications.clone())
            .await
            .unwrap();

        bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1))
            .await
            .unwrap();
        drain(&bus, "search").await;
        drain(&bus, "notifications").await;

        assert_eq!(search.received().len(), 1);
        assert_eq!(notifications.received().len(), 1);
    }

    #[tokio::test]
    async fn test_republishing_an_event_queues_no_second_delivery() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        bus.subscribe("search", &["AuctionCreated"], Arc::new(RecordingHandler::new()))
            .await
            .unwrap();
        let published = event("AuctionCreated", Uuid::new_v4(), 1);

        bus.publish(&published).await.unwrap();
        bus.publish(&published).await.unwrap();

        assert_eq!(store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_nack_is_redelivered_after_backoff_until_ack() {
        // Arrange
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 5);
        let handler = Arc::new(FlakyHandler::failing(2));
        bus.subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();
        bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1))
            .await
            .unwrap();

        // Act
        let first = drain(&bus, "search").await;
        let before_backoff = drain(&bus, "search").await;
        settle(&bus, &clock, "search").await;

        // Assert
        assert_eq!(first.redelivery_scheduled, 1);
        assert_eq!(before_backoff.claimed, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let stored = &store.deliveries()[0];
        assert_eq!(stored.status, DeliveryStatus::Acked);
        assert_eq!(stored.deliveries, 2);
        assert!(bus.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_nack_is_dead_lettered_after_max_deliveries() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        let handler = Arc::new(FlakyHandler::failing(u32::MAX));
        bus.subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();
        let published = event("AuctionCreated", Uuid::new_v4(), 1);

        bus.publish(&published).await.unwrap();
        settle(&bus, &clock, "search").await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let letters = bus.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].subscription, "search");
        assert_eq!(letters[0].event, published);
        assert_eq!(letters[0].deliveries, 3);
        assert_eq!(letters[0].reason, "database busy");
    }

    #[tokio::test]
    async fn test_permanent_nack_is_dead_lettered_without_redelivery() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 5);
        bus.subscribe("search", &["AuctionCreated"], Arc::new(RejectingHandler))
            .await
            .unwrap();

        bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1))
            .await
            .unwrap();
        let report = drain(&bus, "search").await;

        assert_eq!(report.dead_lettered, 1);
        let letters = bus.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].deliveries, 1);
        assert_eq!(letters[0].reason, "unsupported schema");
        assert_eq!(letters[0].failed_at, start());
    }

    #[tokio::test]
    async fn test_later_events_of_an_aggregate_wait_for_a_redelivery() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 5);
        let handler = Arc::new(FlakyHandler::failing(1));
        bus.subscribe("search", &["AuctionUpdated"], handler.clone())
            .await
            .unwrap();
        let aggregate_id = Uuid::new_v4();
        bus.publish(&event("AuctionUpdated", aggregate_id, 1))
            .await
            .unwrap();
        bus.publish(&event("AuctionUpdated", aggregate_id, 2))
            .await
            .unwrap();

        let blocked = drain(&bus, "search").await;
        settle(&bus, &clock, "search").await;

        assert_eq!(blocked.claimed, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(store
            .deliveries()
            .iter()
            .all(|d| d.status == DeliveryStatus::Acked));
    }

    #[tokio::test]
    async fn test_dead_letter_does_not_block_later_events_of_the_aggregate() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 2);
        let handler = Arc::new(FlakyHandler::failing(2));
        bus.subscribe("search", &["AuctionUpdated"], handler.clone())
            .await
            .unwrap();
        let aggregate_id = Uuid::new_v4();

        bus.publish(&event("AuctionUpdated", aggregate_id, 1))
            .await
            .unwrap();
        bus.publish(&event("AuctionUpdated", aggregate_id, 2))
            .await
            .unwrap();
        settle(&bus, &clock, "search").await;

        assert_eq!(bus.dead_letters().await.unwrap().len(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pending_redelivery_survives_a_restart() {
        // Arrange
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let published = event("AuctionCreated", Uuid::new_v4(), 1);
        {
            let first = bus(&store, &clock, 5);
            first
                .subscribe("search", &["AuctionCreated"], Arc::new(FlakyHandler::failing(u32::MAX)))
                .await
                .unwrap();
            first.publish(&published).await.unwrap();
            drain(&first, "search").await;
            first.close().await;
        }

        // Act
        let second = bus(&store, &clock, 5);
        let handler = Arc::new(RecordingHandler::new());
        second
            .subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(1));
        let report = drain(&second, "search").await;

        // Assert
        assert_eq!(report.acked, 1);
        assert_eq!(handler.received(), vec![published]);
        assert_eq!(store.deliveries()[0].status, DeliveryStatus::Acked);
    }

    #[tokio::test]
    async fn test_dead_letter_survives_a_restart() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let published = event("AuctionCreated", Uuid::new_v4(), 1);
        {
            let first = bus(&store, &clock, 5);
            first
                .subscribe("search", &["AuctionCreated"], Arc::new(RejectingHandler))
                .await
                .unwrap();
            first.publish(&published).await.unwrap();
            drain(&first, "search").await;
            first.close().await;
        }

        let second = bus(&store, &clock, 5);
        let letters = second.dead_letters().await.unwrap();

        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event, published);
        assert_eq!(letters[0].reason, "unsupported schema");
    }

    #[tokio::test]
    async fn test_event_published_while_consumer_is_down_is_delivered_on_resubscribe() {
        // Arrange
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        {
            let consumer = bus(&store, &clock, 5);
            consumer
                .subscribe("search", &["AuctionCreated"], Arc::new(RecordingHandler::new()))
                .await
                .unwrap();
            consumer.close().await;
        }
        let publisher = bus(&store, &clock, 5);
        let published = event("AuctionCreated", Uuid::new_v4(), 1);

        // Act
        publisher.publish(&published).await.unwrap();
        let consumer = bus(&store, &clock, 5);
        let handler = Arc::new(RecordingHandler::new());
        consumer
            .subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();
        drain(&consumer, "search").await;

        // Assert
        assert_eq!(handler.received(), vec![published]);
    }

    #[tokio::test]
    async fn test_background_consumers_deliver_without_polling() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = DurableBus::new(
            store.clone(),
            clock,
            Box::new(MockRng),
            BusConfig {
                workers: 2,
                poll_interval: Duration::from_millis(5),
                ..config(3)
            },
        );
        let handler = Arc::new(RecordingHandler::new());
        bus.subscribe("search", &["AuctionCreated"], handler.clone())
            .await
            .unwrap();

        bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1))
            .await
            .unwrap();

        assert!(handler.wait_for(1, Duration::from_secs(5)).await);
        bus.close().await;
        assert_eq!(handler.received().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_enqueue_is_unavailable() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        store.fail_next_enqueues(1);

        let result = bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1)).await;

        assert!(matches!(result, Err(BusError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_publish_after_close_is_unavailable() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        bus.close().await;

        let result = bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1)).await;

        assert!(matches!(result, Err(BusError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_duplicate_subscription_name_is_rejected() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);
        bus.subscribe("search", &["AuctionCreated"], Arc::new(RecordingHandler::new()))
            .await
            .unwrap();

        let result = bus
            .subscribe("search", &["AuctionUpdated"], Arc::new(RecordingHandler::new()))
            .await;

        assert!(matches!(result, Err(BusError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_polling_an_unknown_subscription_is_rejected() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);

        let result = bus.poll("search").await;

        assert!(matches!(result, Err(BusError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_accepted() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = bus(&store, &clock, 3);

        let result = bus.publish(&event("AuctionCreated", Uuid::new_v4(), 1)).await;

        assert!(result.is_ok());
        assert!(store.deliveries().is_empty());
    }
}
