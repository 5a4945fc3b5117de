//! Test Utilities Crate
//!
//! Shared test infrastructure, fixtures, and helpers for the billing
//! ledger test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data for common entities
//! - `builders`: Builder patterns for test data construction
//! - `harness`: A fully wired in-memory billing environment
//! - `assertions`: Custom assertion helpers for domain types
//! - `generators`: Property-based test data generators

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod generators;
pub mod harness;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
