//! Port adapters owned by the billing domain
//!
//! The in-memory adapters implement the full write contract of the ports
//! (version checks, atomic commits, clinic scoping), so the services can
//! be exercised without a database. The PostgreSQL adapter lives in the
//! `infra_db` crate.

pub mod memory;

pub use memory::{InMemoryLedgerStore, InMemoryPatientDirectory, StaticAccessPolicy};
