//! Background dispatcher for pending outbox records.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use auctionhouse_core::bus::MessageBus;
use auctionhouse_core::clock::{Clock, after, before};
use auctionhouse_core::error::DomainError;
use auctionhouse_core::outbox::{OutboxRecord, OutboxRepository};
use auctionhouse_core::retry::RetryPolicy;
use auctionhouse_core::rng::DeterministicRng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Tuning for [`OutboxDispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Records claimed per pass.
    pub batch_size: usize,
    /// Sleep between passes when there is nothing to do.
    pub poll_interval: Duration,
    /// How long a claimed record is hidden from other dispatchers.
    pub lease: Duration,
    /// Backoff and attempt limit for failed publishes.
    pub retry: RetryPolicy,
    /// How long dispatched records are kept.
    pub retention: Duration,
    /// How often dispatched records past retention are purged.
    pub purge_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records claimed.
    pub claimed: usize,
    /// Records accepted by the bus.
    pub dispatched: usize,
    /// Records rescheduled after a publish failure.
    pub retried: usize,
    /// Records that ran out of attempts.
    pub dead_lettered: usize,
    /// Records whose outcome could not be stored. They stay pending and are
    /// claimed again once their lease expires.
    pub unrecorded: usize,
}

/// Publishes pending outbox records to the bus, oldest first per aggregate.
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxRepository>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn DeterministicRng>>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for OutboxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OutboxDispatcher {
    /// Creates a dispatcher over `outbox` publishing to `bus`.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            outbox,
            bus,
            clock,
            rng: Mutex::new(rng),
            config,
        }
    }

    /// Claims due records and publishes each one.
    ///
    /// A record is marked dispatched only after the bus accepted it. A failed
    /// publish is rescheduled with backoff, or dead-lettered once the retry
    /// policy is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if records cannot be claimed. Bus failures and
    /// failures to store a single record's outcome are logged and counted, and
    /// the pass moves on to the next record.
    #[instrument(skip_all)]
    pub async fn dispatch_once(&self) -> Result<DispatchReport, DomainError> {
        let now = self.clock.now();
        let records = self
            .outbox
            .claim_due(now, after(now, self.config.lease), self.config.batch_size)
            .await?;

        let mut report = DispatchReport {
            claimed: records.len(),
            ..DispatchReport::default()
        };
        for record in records {
            let outcome = match self.bus.publish(&record.event).await {
                Ok(()) => self
                    .outbox
                    .mark_dispatched(record.id(), self.clock.now())
                    .await
                    .map(|()| {
                        debug!(
                            event_id = %record.id(),
                            event_type = %record.event.event_type,
                            aggregate_id = %record.event.aggregate_id,
                            sequence_number = record.event.sequence_number,
                            "outbox record dispatched"
                        );
                        report.dispatched += 1;
                    }),
                Err(e) => self
                    .handle_failure(&record, &e.to_string())
                    .await
                    .map(|dead_lettered| {
                        if dead_lettered {
                            report.dead_lettered += 1;
                        } else {
                            report.retried += 1;
                        }
                    }),
            };
            if let Err(e) = outcome {
                error!(
                    event_id = %record.id(),
                    event_type = %record.event.event_type,
                    error = %e,
                    "could not record outbox dispatch outcome"
                );
                report.unrecorded += 1;
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                dispatched = report.dispatched,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                unrecorded = report.unrecorded,
                "outbox pass finished"
            );
        }
        Ok(report)
    }

    /// Returns `true` if the record was dead-lettered.
    async fn handle_failure(&self, record: &OutboxRecord, reason: &str) -> Result<bool, DomainError> {
        let attempts = record.attempts.saturating_add(1);
        let attempts_u32 = u32::try_from(attempts).unwrap_or(u32::MAX);

        if self.config.retry.is_exhausted(attempts_u32) {
            self.outbox.dead_letter(record.id(), attempts, reason).await?;
            error!(
                event_id = %record.id(),
                event_type = %record.event.event_type,
                aggregate_id = %record.event.aggregate_id,
                attempts,
                error = reason,
                "outbox record dead-lettered"
            );
            return Ok(true);
        }

        let jitter = self.rng.lock().map_or(0.0, |mut rng| rng.next_f64());
        let delay = self.config.retry.delay_for(attempts_u32, jitter);
        let next_attempt_at = after(self.clock.now(), delay);
        self.outbox
            .schedule_retry(record.id(), attempts, next_attempt_at, reason)
            .await?;
        warn!(
            event_id = %record.id(),
            event_type = %record.event.event_type,
            aggregate_id = %record.event.aggregate_id,
            attempts,
            %next_attempt_at,
            error = reason,
            "publish failed, retry scheduled"
        );
        Ok(false)
    }

    /// Deletes dispatched records older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the outbox storage fails.
    pub async fn purge_expired(&self) -> Result<u64, DomainError> {
        let cutoff = before(self.clock.now(), self.config.retention);
        let purged = self.outbox.purge_dispatched(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged dispatched outbox records");
        }
        Ok(purged)
    }

    /// Runs dispatch passes until `shutdown` turns `true` or its sender is
    /// dropped. A pass in progress always finishes.
    ///
    /// Passes repeat immediately while they make progress, since dispatching a
    /// record can make the next record of the same aggregate due.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "outbox dispatcher started"
        );
        let mut next_purge = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let progressed = match self.dispatch_once().await {
                Ok(report) => report.dispatched > 0 || report.dead_lettered > 0,
                Err(e) => {
                    error!(error = %e, "outbox pass failed");
                    false
                }
            };

            if Instant::now() >= next_purge {
                if let Err(e) = self.purge_expired().await {
                    error!(error = %e, "outbox purge failed");
                }
                next_purge = Instant::now() + self.config.purge_interval;
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
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("outbox dispatcher stopped");
    }
}
