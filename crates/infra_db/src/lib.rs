//! Infrastructure Database Layer
//!
//! This crate provides the PostgreSQL persistence layer for the billing
//! ledger, implementing the domain's `LedgerStore` port with SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: domain services depend only
//! on the port traits, and this crate supplies the database-backed
//! implementation. Bill writes are guarded by an optimistic version
//! column; payment and refund commits run in transactions so the record
//! and its bill update land together.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgLedgerRepository};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/clinic_ledger")).await?;
//! let store = PgLedgerRepository::new(pool);
//! ```

pub mod error;
pub mod pool;
pub mod repositories;

pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use repositories::PgLedgerRepository;
