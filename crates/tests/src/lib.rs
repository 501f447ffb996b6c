//! Integration Tests for Liteline
//!
//! This crate contains various test modules:
//!
//! - `connection_tests`: Connection engine against mock lite servers (TCP and WebSocket)
//! - `load_balancer_tests`: Round-robin rotation, readiness tracking and retry budgets
//! - `priority_tests`: Tier suppression, error windows and recovery probes
//! - `hierarchy_tests`: The full builder-assembled hierarchy failing over between servers
//! - `mock_infrastructure`: Reusable mock types for testing (lite server, engines)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```


#[cfg(test)]
mod load_balancer_tests;

#[cfg(test)]
mod priority_tests;

#[cfg(test)]
mod hierarchy_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
