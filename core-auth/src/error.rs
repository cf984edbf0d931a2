use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpResponse;
use std::fmt;
use thiserror::Error;

/// Failure categories a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The API rejected the credential (recoverable by one refresh).
    AuthFailure,
    /// The long-lived refresh secret is invalid; the stored credential was cleared.
    RefreshDenied,
    /// A human has to sign in again.
    InteractiveAuthRequired,
    /// Transient transport failure.
    NetworkFailure,
    /// Any other HTTP error, or a failed replay.
    OtherFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthFailure => "AuthFailure",
            FailureKind::RefreshDenied => "RefreshDenied",
            FailureKind::InteractiveAuthRequired => "InteractiveAuthRequired",
            FailureKind::NetworkFailure => "NetworkFailure",
            FailureKind::OtherFailure => "OtherFailure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a refresh did not produce a credential.
///
/// Cloned to every request waiting on the same refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("Network failure during credential refresh: {0}")]
    NetworkFailure(String),

    #[error("Interactive authentication required: {0}")]
    InteractiveAuthRequired(String),

    #[error("Credential refresh denied: {0}")]
    RefreshDenied(String),
}

impl RefreshFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            RefreshFailure::NetworkFailure(_) => FailureKind::NetworkFailure,
            RefreshFailure::InteractiveAuthRequired(_) => FailureKind::InteractiveAuthRequired,
            RefreshFailure::RefreshDenied(_) => FailureKind::RefreshDenied,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RefreshFailure::NetworkFailure(message)
            | RefreshFailure::InteractiveAuthRequired(message)
            | RefreshFailure::RefreshDenied(message) => message,
        }
    }
}

/// Errors returned by [`AuthGateway`](crate::AuthGateway).
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The credential was rejected and no further refresh is attempted.
    ///
    /// `replayed` is set when the rejection came from the single replay.
    #[error("{target} rejected the credential with status {}", .response.status)]
    Unauthorized {
        target: String,
        response: HttpResponse,
        replayed: bool,
    },

    /// The credential was rejected and the refresh failed.
    ///
    /// `original` is the response the caller's request received.
    #[error("Credential refresh for {target} failed: {failure}")]
    RefreshFailed {
        target: String,
        failure: RefreshFailure,
        original: HttpResponse,
    },

    #[error("{target} failed with status {}", .response.status)]
    Status {
        target: String,
        response: HttpResponse,
    },

    #[error("Transport error for {target}: {source}")]
    Network {
        target: String,
        #[source]
        source: BridgeError,
    },

    /// The replay never produced a response (transport error, timeout or cancellation).
    #[error("Replay of {target} aborted: {source}")]
    ReplayAborted {
        target: String,
        #[source]
        source: BridgeError,
    },
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Unauthorized { .. } => FailureKind::AuthFailure,
            GatewayError::RefreshFailed { failure, .. } => failure.kind(),
            GatewayError::Status { .. } => FailureKind::OtherFailure,
            GatewayError::Network { .. } => FailureKind::NetworkFailure,
            GatewayError::ReplayAborted { .. } => FailureKind::OtherFailure,
        }
    }

    /// The response the caller should reason about, when there is one.
    pub fn original_response(&self) -> Option<&HttpResponse> {
        match self {
            GatewayError::Unauthorized { response, .. } | GatewayError::Status { response, .. } => {
                Some(response)
            }
            GatewayError::RefreshFailed { original, .. } => Some(original),
            GatewayError::Network { .. } | GatewayError::ReplayAborted { .. } => None,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            GatewayError::Unauthorized { target, .. }
            | GatewayError::RefreshFailed { target, .. }
            | GatewayError::Status { target, .. }
            | GatewayError::Network { target, .. }
            | GatewayError::ReplayAborted { target, .. } => target,
        }
    }

    /// The refresh failure, when the request failed because of one.
    pub fn refresh_failure(&self) -> Option<&RefreshFailure> {
        match self {
            GatewayError::RefreshFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_refresh_failure_kinds() {
        assert_eq!(
            RefreshFailure::RefreshDenied("invalid_grant".into()).kind(),
            FailureKind::RefreshDenied
        );
        assert_eq!(
            RefreshFailure::InteractiveAuthRequired("cancelled".into()).kind(),
            FailureKind::InteractiveAuthRequired
        );
        assert_eq!(
            RefreshFailure::NetworkFailure("reset".into()).message(),
            "reset"
        );
    }

    #[test]
    fn test_refresh_failed_reports_refresh_kind_and_original() {
        let error = GatewayError::RefreshFailed {
            target: "/api/articles/5".into(),
            failure: RefreshFailure::InteractiveAuthRequired("login cancelled".into()),
            original: HttpResponse::new(401, "expired"),
        };

        assert_eq!(error.kind(), FailureKind::InteractiveAuthRequired);
        assert_eq!(error.original_response().map(|r| r.status), Some(401));
        assert!(error.refresh_failure().is_some());
        assert!(error.to_string().contains("login cancelled"));
    }

    #[test]
    fn test_replay_aborted_is_other_failure() {
        let error = GatewayError::ReplayAborted {
            target: "/api/articles".into(),
            source: BridgeError::Timeout(Duration::from_secs(1)),
        };

        assert_eq!(error.kind(), FailureKind::OtherFailure);
        assert!(error.original_response().is_none());
        assert_eq!(error.target(), "/api/articles");
    }

    #[test]
    fn test_status_display_includes_status() {
        let error = GatewayError::Status {
            target: "/api/images".into(),
            response: HttpResponse::new(404, ""),
        };
        assert_eq!(error.to_string(), "/api/images failed with status 404");
        assert_eq!(FailureKind::OtherFailure.to_string(), "OtherFailure");
    }
}
