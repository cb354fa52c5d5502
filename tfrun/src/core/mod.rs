//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod decision;
pub mod log_counts;
pub mod overview;
pub mod status;
pub mod types;
pub mod variables;
