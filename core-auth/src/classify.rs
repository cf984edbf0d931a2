//! Response classification.
//!
//! The protected API reports authentication problems two ways: a 401, or an
//! error response whose status line reads "OAuth2 authentication required"
//! whatever the code. The marker is also looked for in the body, since
//! HTTP/2 responses and some proxies drop custom reason phrases. The marker
//! works around an inconsistent server error contract and should go away
//! once the API answers 401 uniformly.

use bridge_traits::http::HttpResponse;
use core_runtime::config::{GatewayConfig, DEFAULT_AUTH_FAILURE_STATUS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// The credential was missing, expired or rejected.
    AuthFailure,
    /// Any other error status. Never refreshed or replayed.
    OtherFailure,
}

#[derive(Debug, Clone)]
pub struct AuthFailureClassifier {
    statuses: Vec<u16>,
    marker: Option<String>,
}

impl AuthFailureClassifier {
    pub fn new(statuses: impl IntoIterator<Item = u16>, marker: Option<String>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            marker,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.auth_failure_statuses.iter().copied(),
            config.auth_required_marker.clone(),
        )
    }

    pub fn classify(&self, response: &HttpResponse) -> ResponseClass {
        if response.status < 400 {
            return ResponseClass::Success;
        }

        if self.statuses.contains(&response.status) || self.carries_marker(response) {
            ResponseClass::AuthFailure
        } else {
            ResponseClass::OtherFailure
        }
    }

    fn carries_marker(&self, response: &HttpResponse) -> bool {
        let Some(marker) = self.marker.as_deref() else {
            return false;
        };
        let in_reason = response
            .reason
            .as_deref()
            .map_or(false, |reason| reason.trim() == marker);
        in_reason || String::from_utf8_lossy(&response.body).contains(marker)
    }
}

impl Default for AuthFailureClassifier {
    fn default() -> Self {
        Self::new(
            [DEFAULT_AUTH_FAILURE_STATUS],
            Some(core_runtime::config::DEFAULT_AUTH_REQUIRED_MARKER.to_string()),
        )
    }
}
