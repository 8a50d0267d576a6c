//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Transactional outbox.
    ///
    /// Rows are inserted in the same transaction as the business mutation
    /// they announce and flipped to processed once by the dispatcher. The
    /// partial index `outbox_events_pending_idx` covers
    /// `(created_at, id) WHERE NOT processed`.
    outbox_events (id) {
        /// Primary key: UUID v4 identifier.
        id -> Uuid,
        /// Aggregate type (max 100 characters).
        #[max_length = 100]
        aggregate_type -> Varchar,
        /// Aggregate identifier (max 255 characters).
        #[max_length = 255]
        aggregate_id -> Varchar,
        /// Event type (max 100 characters).
        #[max_length = 100]
        event_type -> Varchar,
        /// Opaque event payload.
        payload -> Jsonb,
        /// Whether the dispatcher has published the event.
        processed -> Bool,
        /// Insert time; dispatch order.
        created_at -> Timestamptz,
        /// When the event was marked processed.
        processed_at -> Nullable<Timestamptz>,
    }
}
