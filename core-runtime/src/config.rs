//! # Gateway Configuration Module
//!
//! Provides configuration management for the authenticated request gateway.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `GatewayConfig`
//! instance that holds the transport and the settings the gateway needs to
//! decide which requests are protected and which responses mean "authenticate
//! again". It enforces fail-fast validation so a misconfigured gateway never
//! starts issuing requests.
//!
//! ## Required Settings
//!
//! - `api_prefix` - Path prefix of the protected API (e.g. `/api`)
//! - `HttpClient` - Transport for gateway calls (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, a `ReqwestHttpClient` is
//! injected automatically if no transport is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::GatewayConfig;
//! use std::time::Duration;
//!
//! let config = GatewayConfig::builder()
//!     .api_prefix("/api")
//!     .api_origin("https://cms.example.com")
//!     .exclude_from_auth("/api/public")
//!     .request_timeout(Duration::from_secs(20))
//!     .http_client(Arc::new(MyHttpClient))
//!     .build()?;
//! ```
//!
//! ## Auth failure signals
//!
//! The wrapped API does not uniformly answer 401 on authentication problems;
//! some endpoints return another error status whose reason phrase (or body)
//! reads "authentication required". Both signals are configurable: `auth_failure_statuses`
//! and `auth_required_marker`.

use crate::error::{Error, Result};
use bridge_traits::HttpClient;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Status the protected API uses for rejected credentials.
pub const DEFAULT_AUTH_FAILURE_STATUS: u16 = 401;

/// Message the protected API reports when it wants a new token but does not
/// answer with 401.
pub const DEFAULT_AUTH_REQUIRED_MARKER: &str = "OAuth2 authentication required";

/// Default upper bound for one credential refresh (2 minutes, enough for an
/// interactive login).
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(120);

/// Gateway configuration.
///
/// Use [`GatewayConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Path prefix of the protected API, without trailing slash
    pub api_prefix: String,

    /// Origin of the protected API; absolute targets elsewhere are cross-origin
    pub api_origin: Option<Url>,

    /// Path prefixes that stay unauthenticated even under `api_prefix`
    pub excluded_prefixes: Vec<String>,

    /// Statuses classified as authentication failures
    pub auth_failure_statuses: Vec<u16>,

    /// Reason phrase (or body message) classified as an authentication failure
    /// on non-2xx responses
    pub auth_required_marker: Option<String>,

    /// Per-attempt transport timeout enforced by the gateway
    pub request_timeout: Option<Duration>,

    /// Upper bound for one refresh operation
    pub refresh_timeout: Duration,

    /// Transport for gateway calls
    pub http_client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_prefix", &self.api_prefix)
            .field("api_origin", &self.api_origin.as_ref().map(Url::as_str))
            .field("excluded_prefixes", &self.excluded_prefixes)
            .field("auth_failure_statuses", &self.auth_failure_statuses)
            .field("auth_required_marker", &self.auth_required_marker)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("http_client", &"HttpClient { ... }")
            .finish()
    }
}

impl GatewayConfig {
    /// Creates a new builder for constructing a `GatewayConfig`.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The API prefix is an absolute path
    /// - Excluded prefixes are absolute paths
    /// - Auth failure statuses are client errors (4xx) and at least one is set
    /// - The marker, when present, is not blank
    /// - Timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        if !self.api_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "API prefix must be an absolute path starting with '/', got '{}'",
                self.api_prefix
            )));
        }

        if let Some(prefix) = self.excluded_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::Config(format!(
                "Excluded prefix must be an absolute path starting with '/', got '{}'",
                prefix
            )));
        }

        if self.auth_failure_statuses.is_empty() {
            return Err(Error::Config(
                "At least one auth failure status is required".to_string(),
            ));
        }

        if let Some(status) = self
            .auth_failure_statuses
            .iter()
            .find(|s| !(400..500).contains(*s))
        {
            return Err(Error::Config(format!(
                "Auth failure status {} is not a client error (4xx)",
                status
            )));
        }

        if matches!(&self.auth_required_marker, Some(marker) if marker.trim().is_empty()) {
            return Err(Error::Config(
                "Auth required marker cannot be blank; disable it instead".to_string(),
            ));
        }

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.refresh_timeout.is_zero() {
            return Err(Error::Config(
                "Refresh timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for gateway requests. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Tests: inject a scripted transport."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() && prefix.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_origin(value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| Error::InvalidEndpoint {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::InvalidEndpoint {
            value: value.to_string(),
            reason: "origin must be an absolute http(s) URL with a host".to_string(),
        });
    }

    Ok(url)
}

/// Builder for constructing [`GatewayConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](GatewayConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    api_prefix: Option<String>,
    api_origin: Option<String>,
    excluded_prefixes: Vec<String>,
    auth_failure_statuses: Option<Vec<u16>>,
    auth_required_marker: Option<Option<String>>,
    request_timeout: Option<Duration>,
    refresh_timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl GatewayConfigBuilder {
    /// Sets the protected API path prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::GatewayConfig;
    ///
    /// let builder = GatewayConfig::builder().api_prefix("/api");
    /// ```
    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = Some(prefix.into());
        self
    }

    /// Sets the origin of the protected API (scheme + host + port).
    pub fn api_origin(mut self, origin: impl Into<String>) -> Self {
        self.api_origin = Some(origin.into());
        self
    }

    /// Leaves requests under `prefix` unauthenticated.
    pub fn exclude_from_auth(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_prefixes.push(prefix.into());
        self
    }

    /// Replaces the statuses classified as authentication failures.
    pub fn auth_failure_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.auth_failure_statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Sets the server-reported "authentication required" message.
    pub fn auth_required_marker(mut self, marker: impl Into<String>) -> Self {
        self.auth_required_marker = Some(Some(marker.into()));
        self
    }

    /// Only the configured statuses count as authentication failures.
    pub fn disable_auth_required_marker(mut self) -> Self {
        self.auth_required_marker = Some(None);
        self
    }

    /// Sets the per-attempt transport timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the upper bound for one refresh operation.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Sets the HTTP client used for gateway calls.
    ///
    /// The credential refresher must be given its own client; it never goes
    /// through the gateway.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the final configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the API prefix is missing or any value is invalid
    /// - `Error::InvalidEndpoint` if the API origin cannot be parsed
    /// - `Error::CapabilityMissing` if no HTTP client is available
    pub fn build(self) -> Result<GatewayConfig> {
        let api_prefix = self.api_prefix.ok_or_else(|| {
            Error::Config("API prefix is required. Use .api_prefix() to set it.".to_string())
        })?;

        let api_origin = self.api_origin.as_deref().map(parse_origin).transpose()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = GatewayConfig {
            api_prefix: normalize_prefix(&api_prefix),
            api_origin,
            excluded_prefixes: self
                .excluded_prefixes
                .iter()
                .map(|p| normalize_prefix(p))
                .collect(),
            auth_failure_statuses: self
                .auth_failure_statuses
                .unwrap_or_else(|| vec![DEFAULT_AUTH_FAILURE_STATUS]),
            auth_required_marker: self
                .auth_required_marker
                .unwrap_or_else(|| Some(DEFAULT_AUTH_REQUIRED_MARKER.to_string())),
            request_timeout: self.request_timeout,
            refresh_timeout: self.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT),
            http_client,
        };

        config.validate()?;

        Ok(config)
    }
}
