//! Mock Infrastructure for Testing Liteline
//!
//! This module provides reusable mock types for testing the engine hierarchy
//! without requiring real lite servers.
//!
//! ## Components
//!
//! - `MockLiteServer`: Datagram + handshake speaking server over TCP or WebSocket
//! - `MockEngine`: Scriptable in-process engine with a shared dispatch log
//! - Test helpers for common scenarios
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::MockLiteServer;
//!
//! let server = MockLiteServer::tcp().await?;
//! let engine = ConnectionEngine::new(server.peer(), ConnectionConfig::default());
//! ```

pub mod test_helpers;

pub use lite_server_mock::{sample_masterchain_info, MockLiteServer, MockServerOptions, ServerBehavior};
pub use mock_engine::{dispatch_log, DispatchLog, MockEngine, MOCK_FAILURE_CODE};
pub use test_helpers::*;
