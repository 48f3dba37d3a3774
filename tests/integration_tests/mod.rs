//! Integration tests module
//!
//! End-to-end tests of the coordination engine through its public API:
//! - Discovery agent polls feeding the liveness tracker
//! - Data agent polls feeding the statistics store
//! - Malformed input and failing backends

pub mod error_scenarios;
pub mod fixtures;
pub mod poll_cycle_test;
