//! In-memory transactional outbox.
//!
//! Appends are staged on an [`InMemoryOutboxTransaction`] and become visible
//! to the dispatcher only on [`InMemoryOutboxTransaction::commit`]; dropping
//! the transaction discards them. Useful for tests and for running the
//! service without PostgreSQL.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use tracing::debug;

use crate::domain::ports::{OutboxAppender, OutboxRepository, OutboxRepositoryError};
use crate::domain::{NewOutboxEvent, OutboxEvent, OutboxEventId};

/// Process-local outbox store.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    events: Arc<Mutex<Vec<OutboxEvent>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }

    /// Create an empty store stamping events with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            clock,
        }
    }

    /// Open a transaction for staging events.
    pub fn begin(&self) -> InMemoryOutboxTransaction {
        InMemoryOutboxTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }
    }

    /// Snapshot of every committed event in commit order.
    pub fn events(&self) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<OutboxEvent>>, OutboxRepositoryError> {
        self.events
            .lock()
            .map_err(|_| OutboxRepositoryError::connection("in-memory outbox lock poisoned"))
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut pending: Vec<OutboxEvent> = self
            .lock()?
            .iter()
            .filter(|event| !event.processed)
            .cloned()
            .collect();
        // Stable sort keeps commit order for equal timestamps.
        pending.sort_by_key(|event| event.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(
        &self,
        id: &OutboxEventId,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut events = self.lock()?;
        let Some(event) = events
            .iter_mut()
            .find(|event| event.id == *id && !event.processed)
        else {
            return Ok(false);
        };
        event.processed = true;
        event.processed_at = Some(processed_at);
        Ok(true)
    }
}

/// Staged appends awaiting commit.
pub struct InMemoryOutboxTransaction {
    store: InMemoryOutboxStore,
    staged: Vec<OutboxEvent>,
}

impl InMemoryOutboxTransaction {
    /// Number of staged events.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Publish staged events to the store atomically.
    ///
    /// Returns the number of committed events.
    pub fn commit(mut self) -> Result<usize, OutboxRepositoryError> {
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        self.store.lock()?.extend(staged);
        Ok(count)
    }

    /// Discard staged events. Equivalent to dropping the transaction.
    pub fn rollback(self) {}
}

impl Drop for InMemoryOutboxTransaction {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(discarded = self.staged.len(), "outbox transaction rolled back");
        }
    }
}

#[async_trait]
impl OutboxAppender for InMemoryOutboxTransaction {
    async fn append(
        &mut self,
        event: NewOutboxEvent,
    ) -> Result<OutboxEventId, OutboxRepositoryError> {
        let id = OutboxEventId::random();
        self.staged
            .push(event.into_event(id, self.store.clock.utc()));
        Ok(id)
    }
}
