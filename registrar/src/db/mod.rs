//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! It follows the Repository pattern to provide clean abstractions over database operations.
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations, one per table family
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Transactions
//!
//! Repositories wrap a `&mut PgConnection`, so the same repository runs on a
//! pooled connection for reads or inside a transaction for writes:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE").execute(&mut *tx).await?;
//! let reserved = Tickets::new(&mut tx).increment_sold(ticket_id).await?;
//! tx.commit().await?;
//! ```
//!
//! Registration and cancellation always run under `SERIALIZABLE` isolation
//! (see [`crate::registration`]); everything else uses the default level.
//!
//! # Migrations
//!
//! Database migrations are managed by SQLx and located in the `migrations/` directory.
//! The [`crate::migrator`] function provides access to the migrator.

pub mod errors;
pub mod handlers;
pub mod models;
