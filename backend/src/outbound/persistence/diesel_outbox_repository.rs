//! PostgreSQL-backed outbox adapter using Diesel ORM.
//!
//! Appends go through [`append_outbox_event`] on the caller's own
//! connection, normally inside the Diesel transaction that performs the
//! business mutation. The dispatcher reads and marks events through
//! [`DieselOutboxRepository`], which checks out its own pooled connections.
//!
//! Pending rows are fetched without row locks, so running more than one
//! dispatcher against the same table publishes events more than once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::ports::{OutboxAppender, OutboxRepository, OutboxRepositoryError};
use crate::domain::{NewOutboxEvent, OutboxEvent, OutboxEventId};

use super::models::{NewOutboxEventRow, OutboxEventRow};
use super::pool::{DbPool, PoolError};
use super::schema::outbox_events;

/// Diesel-backed implementation of the `OutboxRepository` port.
#[derive(Clone)]
pub struct DieselOutboxRepository {
    pool: DbPool,
}

impl DieselOutboxRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> OutboxRepositoryError {
    OutboxRepositoryError::connection(error.into_message())
}

fn map_diesel_error(error: diesel::result::Error) -> OutboxRepositoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            OutboxRepositoryError::connection("database connection error")
        }
        DieselError::DeserializationError(err) => {
            OutboxRepositoryError::serialization(err.to_string())
        }
        DieselError::SerializationError(err) => {
            OutboxRepositoryError::serialization(err.to_string())
        }
        DieselError::QueryBuilderError(_) => OutboxRepositoryError::query("database query error"),
        _ => OutboxRepositoryError::query("database error"),
    }
}

fn row_to_event(row: OutboxEventRow) -> OutboxEvent {
    OutboxEvent {
        id: OutboxEventId::from_uuid(row.id),
        aggregate_type: row.aggregate_type,
        aggregate_id: row.aggregate_id,
        event_type: row.event_type,
        payload: row.payload,
        processed: row.processed,
        created_at: row.created_at,
        processed_at: row.processed_at,
    }
}

/// Insert `event` using `conn`.
///
/// Call this inside the transaction that performs the business mutation so
/// the event commits or rolls back with it:
///
/// ```rust,ignore
/// conn.transaction(|conn| {
///     async move {
///         diesel::insert_into(bookings::table).values(&booking).execute(conn).await?;
///         append_outbox_event(conn, event).await.map_err(BookingError::from)?;
///         Ok::<_, BookingError>(())
///     }
///     .scope_boxed()
/// })
/// .await?;
/// ```
pub async fn append_outbox_event(
    conn: &mut AsyncPgConnection,
    event: NewOutboxEvent,
) -> Result<OutboxEventId, OutboxRepositoryError> {
    let id = OutboxEventId::random();
    let row = NewOutboxEventRow {
        id: *id.as_uuid(),
        aggregate_type: event.aggregate_type(),
        aggregate_id: event.aggregate_id(),
        event_type: event.event_type(),
        payload: event.payload(),
    };
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await
        .map_err(map_diesel_error)?;
    Ok(id)
}

#[async_trait]
impl OutboxAppender for AsyncPgConnection {
    async fn append(
        &mut self,
        event: NewOutboxEvent,
    ) -> Result<OutboxEventId, OutboxRepositoryError> {
        append_outbox_event(self, event).await
    }
}

#[async_trait]
impl OutboxRepository for DieselOutboxRepository {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<OutboxEventRow> = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order((outbox_events::created_at.asc(), outbox_events::id.asc()))
            .limit(limit)
            .select(OutboxEventRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    async fn mark_processed(
        &self,
        id: &OutboxEventId,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            outbox_events::table
                .filter(outbox_events::id.eq(id.as_uuid()))
                .filter(outbox_events::processed.eq(false)),
        )
        .set((
            outbox_events::processed.eq(true),
            outbox_events::processed_at.eq(Some(processed_at)),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use uuid::Uuid;

    #[rstest]
    fn pool_error_maps_to_retryable_connection_error() {
        let repo_err = map_pool_error(PoolError::checkout("connection refused"));

        assert!(matches!(repo_err, OutboxRepositoryError::Connection { .. }));
        assert!(repo_err.is_retryable());
        assert!(repo_err.to_string().contains("connection refused"));
    }

    #[rstest]
    fn closed_connection_maps_to_connection_error() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let repo_err = map_diesel_error(DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            Box::new("server closed the connection".to_owned()),
        ));
        assert!(matches!(repo_err, OutboxRepositoryError::Connection { .. }));
    }

    #[rstest]
    fn other_database_errors_map_to_query_error() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let repo_err = map_diesel_error(DieselError::DatabaseError(
            DatabaseErrorKind::CheckViolation,
            Box::new("value too long".to_owned()),
        ));
        assert!(matches!(repo_err, OutboxRepositoryError::Query { .. }));
        assert!(!repo_err.is_retryable());
    }

    #[rstest]
    fn rows_convert_to_domain_events() {
        let id = Uuid::new_v4();
        let created_at = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let event = row_to_event(OutboxEventRow {
            id,
            aggregate_type: "booking".to_owned(),
            aggregate_id: "b-42".to_owned(),
            event_type: "confirmed".to_owned(),
            payload: json!({ "slot": 7 }),
            processed: false,
            created_at,
            processed_at: None,
        });

        assert_eq!(event.id, OutboxEventId::from_uuid(id));
        assert_eq!(event.topic(), "booking.confirmed");
        assert_eq!(event.created_at, created_at);
    }
}
