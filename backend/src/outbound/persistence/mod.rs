//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! This module backs the transactional outbox with PostgreSQL via Diesel,
//! with async support through `diesel-async` and `bb8` connection pooling.
//!
//! # Architecture
//!
//! - **Thin adapters**: Repository implementations only translate between
//!   Diesel models and domain types. No business logic resides here.
//! - **Internal models**: Diesel row structs (`models.rs`) and schema
//!   definitions (`schema.rs`) are internal implementation details, never
//!   exposed to the domain layer.
//! - **Caller-owned transactions**: Appends run on the caller's connection
//!   so the event shares the business transaction.
//!
//! # Example
//!
//! ```ignore
//! use clinic_backend::outbound::persistence::{DbPool, DieselOutboxRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/clinic")).await?;
//! let outbox = DieselOutboxRepository::new(pool);
//! ```

mod diesel_outbox_repository;
mod models;
mod pool;
mod schema;

pub use diesel_outbox_repository::{DieselOutboxRepository, append_outbox_event};
pub use pool::{DbPool, PoolConfig, PoolError};
