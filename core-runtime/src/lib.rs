//! Runtime plumbing shared by the gateway crates.
//!
//! [`config`] validates a [`GatewayConfig`](config::GatewayConfig) once at
//! startup, [`logging`] installs the tracing subscriber with credential
//! redaction, and [`events`] carries refresh and replay notifications to
//! whoever subscribed.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
