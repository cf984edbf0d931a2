//! `HttpClient` over a pooled reqwest client (rustls).

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use hyper::ext::ReasonPhrase;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IDLE_PER_HOST: usize = 10;

/// Desktop transport.
///
/// Performs exactly one attempt per `execute`. Redirects follow reqwest's
/// default policy; nothing else is retried here, since replaying a request
/// after a credential refresh is the gateway's call.
pub struct ReqwestHttpClient {
    client: Client,
    default_timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// `timeout` bounds requests that do not carry their own deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        let built = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build();

        let client = match built {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Tuned reqwest client unavailable, falling back to defaults");
                Client::new()
            }
        };

        Self {
            client,
            default_timeout: timeout,
        }
    }

    /// Wraps a caller-configured client (proxies, custom roots, ...).
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Every method, standard or not, goes through `from_bytes` so `LINK`
    /// and `UNLINK` reach the wire unchanged.
    fn convert_method(method: HttpMethod) -> Result<reqwest::Method> {
        reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid method: {}", e)))
    }

    fn prepare(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        let builder = headers.into_iter().fold(
            self.client.request(Self::convert_method(method)?, &url),
            |builder, (name, value)| builder.header(name, value),
        );
        let builder = match body {
            Some(body) => builder.body(body),
            None => builder,
        };
        Ok(match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        })
    }

    fn classify(error: reqwest::Error, deadline: Duration) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout(deadline)
        } else if error.is_connect() {
            BridgeError::Connection(error.to_string())
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Headers whose values are not visible ASCII are skipped.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

/// The phrase the server actually sent when it differs from the canonical
/// one, otherwise the canonical phrase for the status.
fn reason_phrase(response: &reqwest::Response) -> Option<String> {
    match response.extensions().get::<ReasonPhrase>() {
        Some(reason) => std::str::from_utf8(reason.as_bytes())
            .ok()
            .map(str::to_owned),
        None => response.status().canonical_reason().map(str::to_owned),
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let deadline = request.timeout.unwrap_or(self.default_timeout);
        let method = request.method;
        debug!(%method, url = %request.url, "Sending");

        let response = match self.prepare(request)?.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, error = %e, "Transport failure");
                return Err(Self::classify(e, deadline));
            }
        };

        let status = response.status().as_u16();
        let reason = reason_phrase(&response);
        let headers = flatten_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(e, deadline))?;

        debug!(%method, status, bytes = body.len(), "Received");
        Ok(HttpResponse {
            status,
            reason,
            headers,
            body,
        })
    }
}
