//! Workspace facade crate.
//!
//! Re-exports the individual workspace crates so host applications can depend
//! on `authgate` alone and enable the documented features (`desktop-shims`)
//! without wiring each crate individually.

pub use bridge_traits as bridge;
pub use core_auth as auth;
pub use core_runtime as runtime;

pub use core_auth::{AuthGateway, Credential, GatewayError, PendingRequest, TokenStore};
pub use core_runtime::config::GatewayConfig;
