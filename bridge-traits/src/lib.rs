//! Host-facing seams of the gateway.
//!
//! The gateway decides when to attach a credential, when a response means
//! "refresh", and when to replay. It never opens a socket or writes a log
//! line to a destination on its own: both go through the traits here, which
//! each host implements once.
//!
//! - [`HttpClient`](http::HttpClient): one request in, one response out.
//!   Status codes are data; only a missing response is an error.
//! - [`LoggerSink`](logging::LoggerSink): receives flattened log entries for
//!   hosts with their own log pipeline.
//!
//! `bridge-desktop` ships the reqwest transport. Tests usually script their
//! own `HttpClient` so they can count attempts and see the headers sent.
//!
//! Failures are reported as [`BridgeError`]. A transport should map its
//! deadline expiry to [`BridgeError::Timeout`] so the gateway can tell an
//! aborted replay from a refused one.

pub mod error;
pub mod http;
pub mod logging;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
