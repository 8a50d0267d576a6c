//! Background task draining the outbox through a publisher.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{
    EventPublisher, NoOpReliabilityMetrics, OutboxRepository, OutboxRepositoryError,
    ReliabilityMetrics, ReliabilityOutcome,
};
use crate::domain::runtime::{Sleeper, TokioSleeper};

use super::OutboxEvent;

/// Batch size and idle poll interval.
///
/// ```
/// # use clinic_backend::domain::OutboxDispatcherConfig;
/// # use std::time::Duration;
/// let config = OutboxDispatcherConfig::default();
/// assert_eq!(config.batch_size(), 100);
/// assert_eq!(config.poll_interval(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxDispatcherConfig {
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxDispatcherConfig {
    /// Default events fetched per cycle.
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    /// Default idle poll interval in milliseconds.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

    /// Create a configuration; a zero batch size is raised to one.
    pub fn new(batch_size: usize, poll_interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Events fetched per cycle.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sleep between cycles when there is nothing to drain.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for OutboxDispatcherConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BATCH_SIZE,
            Duration::from_millis(Self::DEFAULT_POLL_INTERVAL_MS),
        )
    }
}

/// Counts from one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Unprocessed events fetched.
    pub fetched: usize,
    /// Events published and marked processed.
    pub published: usize,
    /// Events left pending for the next cycle.
    pub failed: usize,
}

/// Polls unprocessed events and publishes them one at a time.
///
/// Delivery is at-least-once. An event whose publish fails stays pending and
/// is retried on the next cycle without backoff or an attempt cap.
#[derive(Clone)]
pub struct OutboxDispatcher {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    config: OutboxDispatcherConfig,
    metrics: Arc<dyn ReliabilityMetrics>,
}

impl OutboxDispatcher {
    /// Create a dispatcher that idles on the Tokio timer.
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: OutboxDispatcherConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            sleeper: Arc::new(TokioSleeper),
            config,
            metrics: Arc::new(NoOpReliabilityMetrics),
        }
    }

    /// Replace the sleeper used between cycles.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Report outcomes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ReliabilityMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> OutboxDispatcherConfig {
        self.config
    }

    /// Run exactly one fetch-and-publish cycle.
    ///
    /// # Errors
    ///
    /// Returns the repository error when the batch cannot be fetched.
    /// Publish and mark failures are contained and counted in the report.
    pub async fn run_once(&self) -> Result<DispatchReport, OutboxRepositoryError> {
        let batch = self
            .repository
            .fetch_unprocessed(self.config.batch_size)
            .await?;
        let mut report = DispatchReport {
            fetched: batch.len(),
            ..DispatchReport::default()
        };
        for event in &batch {
            if self.dispatch(event).await {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.fetched > 0 {
            debug!(
                fetched = report.fetched,
                published = report.published,
                failed = report.failed,
                "outbox cycle complete"
            );
        }
        Ok(report)
    }

    async fn dispatch(&self, event: &OutboxEvent) -> bool {
        let topic = event.topic();
        if let Err(err) = self.publisher.publish(&topic, &event.payload).await {
            warn!(
                error = %err,
                event_id = %event.id,
                topic = %topic,
                "outbox publish failed; event stays pending"
            );
            self.metrics.record(ReliabilityOutcome::OutboxPublishFailed);
            return false;
        }
        match self
            .repository
            .mark_processed(&event.id, self.clock.utc())
            .await
        {
            Ok(true) => {
                self.metrics.record(ReliabilityOutcome::OutboxPublished);
                true
            }
            Ok(false) => {
                debug!(event_id = %event.id, "outbox event was already processed");
                true
            }
            Err(err) => {
                error!(
                    error = %err,
                    event_id = %event.id,
                    "published outbox event could not be marked processed; it will be redelivered"
                );
                false
            }
        }
    }

    /// Drain the outbox until `stop` reads `true` or its sender is dropped.
    ///
    /// A full batch that made progress is followed immediately by the next
    /// cycle; otherwise the loop sleeps for the poll interval. The stop
    /// signal interrupts that sleep.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let poll_interval_ms =
            u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX);
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms,
            "outbox dispatcher started"
        );
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(report) => !(report.fetched == self.config.batch_size && report.published > 0),
                Err(err) => {
                    error!(error = %err, "outbox fetch failed");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                () = self.sleeper.sleep(self.config.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow_and_update() {
                        break;
                    }
                }
            }
        }
        info!("outbox dispatcher stopped");
    }

    /// Run the dispatcher on the current Tokio runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let (stop, receiver) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(receiver).await });
        DispatcherHandle { stop, task }
    }
}

/// Handle to a spawned dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop and wait for the current cycle to end.
    pub async fn shutdown(self) {
        // A closed channel means the task already exited.
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "outbox dispatcher task failed");
        }
    }
}
