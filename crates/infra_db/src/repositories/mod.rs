//! Repository implementations
//!
//! PostgreSQL-backed implementations of the domain ports.

pub mod ledger;

pub use ledger::PgLedgerRepository;
