//! Replayable request descriptions.

use crate::types::{Credential, RequestId};
use bridge_traits::http::{HttpMethod, HttpRequest, AUTHORIZATION_HEADER};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Whether a request is the caller's first attempt or the gateway's replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMarker {
    #[default]
    FirstAttempt,
    Replayed,
}

impl RetryMarker {
    pub fn is_set(&self) -> bool {
        matches!(self, RetryMarker::Replayed)
    }
}

/// An outbound call captured so it can be replayed verbatim.
///
/// Build it with the consuming setters, then hand it to
/// [`AuthGateway::send`](crate::AuthGateway::send). The gateway never mutates
/// it; a replay is a derived copy with the [`RetryMarker`] set.
///
/// ```
/// use bridge_traits::http::HttpMethod;
/// use core_auth::PendingRequest;
///
/// let request = PendingRequest::new(HttpMethod::Get, "/api/articles/5")
///     .header("Accept", "application/json");
///
/// let replay = request.replay();
/// assert!(replay.is_retry());
/// assert_eq!(replay.id(), request.id());
/// ```
#[derive(Clone)]
pub struct PendingRequest {
    id: RequestId,
    method: HttpMethod,
    target: String,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    skip_auth: bool,
    marker: RetryMarker,
}

impl PendingRequest {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            target: target.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            skip_auth: false,
            marker: RetryMarker::FirstAttempt,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Per-attempt timeout; overrides the gateway's default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send the request as-is: no credential is attached and an auth
    /// failure is never refreshed. For callers that bring their own
    /// `Authorization` header.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// The copy the gateway sends after a refresh.
    pub fn replay(&self) -> Self {
        Self {
            marker: RetryMarker::Replayed,
            ..self.clone()
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn skips_auth(&self) -> bool {
        self.skip_auth
    }

    pub fn marker(&self) -> RetryMarker {
        self.marker
    }

    pub fn is_retry(&self) -> bool {
        self.marker.is_set()
    }

    /// Transport request for this call, with `credential` as bearer token.
    ///
    /// A credential replaces any `Authorization` header the caller set.
    pub fn to_http_request(&self, credential: Option<&Credential>) -> HttpRequest {
        let mut request = HttpRequest::new(self.method, self.target.clone());
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        request.timeout = self.timeout;

        match credential {
            Some(credential) => request.bearer_token(credential.token()),
            None => request,
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self
            .headers
            .keys()
            .map(String::as_str)
            .filter(|name| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER))
            .collect();

        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &header_names)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("skip_auth", &self.skip_auth)
            .field("marker", &self.marker)
            .finish()
    }
}
