//! # Authenticated Request Gateway
//!
//! Attaches a bearer credential to every request aimed at the protected API,
//! recognises when the server rejects it, and recovers by refreshing the
//! credential once and replaying the request once.
//!
//! ## Overview
//!
//! - [`AuthGateway`] is the entry point every outbound call goes through.
//! - [`AuthScope`] decides which targets get a credential.
//! - [`AuthFailureClassifier`] splits responses into success, auth failure
//!   and other failure.
//! - [`RefreshCoordinator`] guarantees that concurrent rejections share one
//!   in-flight refresh.
//! - [`TokenRefresher`] implementations obtain new credentials: the OAuth2
//!   refresh-token grant ([`SilentRefresher`]), an interactive sign-in
//!   ([`InteractiveRefresher`]), or both chained ([`FallbackRefresher`]).
//!
//! Failures surface as [`GatewayError`]; [`GatewayError::kind`] gives the
//! stable [`FailureKind`] callers match on.

pub mod classify;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod refresher;
pub mod request;
pub mod scope;
pub mod single_flight;
pub mod token_store;
pub mod types;

pub use classify::{AuthFailureClassifier, ResponseClass};
pub use error::{FailureKind, GatewayError, RefreshFailure, Result};
pub use gateway::AuthGateway;
pub use oauth::{OAuthConfig, SilentRefresher};
pub use refresher::{
    FallbackRefresher, InteractiveRefresher, LoginPrompt, RefreshOutcome, TokenRefresher,
};
pub use request::{PendingRequest, RetryMarker};
pub use scope::AuthScope;
pub use single_flight::{RefreshCoordinator, Ticket};
pub use token_store::TokenStore;
pub use types::{Credential, RequestId};
