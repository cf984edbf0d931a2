//! Silent OAuth 2.0 Refresh
//!
//! Exchanges a long-lived refresh secret for a new access token using the
//! `refresh_token` grant (RFC 6749 section 6).
//!
//! # Transport
//!
//! The refresher owns its own [`HttpClient`]. Token endpoint calls never go
//! through the gateway, so they are never intercepted, refreshed or replayed.
//!
//! # Failure mapping
//!
//! | Token endpoint answer              | Outcome          |
//! |------------------------------------|------------------|
//! | 2xx with `access_token`            | new credential   |
//! | 400 / 401 (e.g. `invalid_grant`)   | `RefreshDenied`  |
//! | other status, transport error      | `NetworkFailure` |
//! | 2xx with an unreadable body        | `NetworkFailure` |
//!
//! A denial also drops the stored refresh secret; later refreshes are denied
//! without a network call until [`SilentRefresher::set_refresh_token`] is
//! called.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthConfig, SilentRefresher};
//! use core_auth::TokenRefresher;
//! use std::sync::Arc;
//!
//! # async fn example(http_client: Arc<dyn bridge_traits::HttpClient>) {
//! let config = OAuthConfig::new("authoring-app", "https://cms.example.com/oauth/v2/token");
//! let refresher = SilentRefresher::new(config, http_client, "stored-refresh-secret");
//!
//! match refresher.refresh().await {
//!     Ok(credential) => println!("new credential expires at {:?}", credential.expires_at()),
//!     Err(failure) => println!("refresh failed: {}", failure),
//! }
//! # }
//! ```

use crate::error::RefreshFailure;
use crate::refresher::{RefreshOutcome, TokenRefresher};
use crate::types::Credential;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// OAuth 2.0 client settings for the token endpoint.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Optional for public clients
    pub client_secret: Option<String>,
    pub token_url: String,
    /// Scopes to request; empty keeps the scopes of the original grant
    pub scopes: Vec<String>,
    /// Timeout for one token endpoint call
    pub timeout: Option<Duration>,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_url: token_url.into(),
            scopes: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Refresh-token grant against an OAuth 2.0 token endpoint.
pub struct SilentRefresher {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
    refresh_token: Mutex<Option<String>>,
}

impl SilentRefresher {
    pub fn new(
        config: OAuthConfig,
        http_client: Arc<dyn HttpClient>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            config,
            http_client,
            refresh_token: Mutex::new(Some(refresh_token.into())),
        }
    }

    /// A refresher with no secret yet; it denies until one is set.
    pub fn without_refresh_token(config: OAuthConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
            refresh_token: Mutex::new(None),
        }
    }

    /// Install a new refresh secret, e.g. after an interactive sign-in.
    pub async fn set_refresh_token(&self, refresh_token: impl Into<String>) {
        *self.refresh_token.lock().await = Some(refresh_token.into());
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.refresh_token.lock().await.is_some()
    }

    fn token_request(&self, refresh_token: &str) -> Result<HttpRequest, RefreshFailure> {
        let scope = self.config.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        let encoded = serde_urlencoded::to_string(&params).map_err(|e| {
            RefreshFailure::NetworkFailure(format!("failed to encode token request: {}", e))
        })?;

        let mut request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(Bytes::from(encoded));
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }
        Ok(request)
    }
}

#[async_trait]
impl TokenRefresher for SilentRefresher {
    #[instrument(skip(self), fields(client_id = %self.config.client_id))]
    async fn refresh(&self) -> RefreshOutcome {
        // Held across the exchange so a rotated secret is never raced.
        let mut stored = self.refresh_token.lock().await;
        let Some(refresh_token) = stored.clone() else {
            debug!("No refresh secret available");
            return Err(RefreshFailure::RefreshDenied(
                "no refresh token available".to_string(),
            ));
        };

        let request = self.token_request(&refresh_token)?;
        debug!("Requesting new access token");

        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(error = %e, "Token endpoint unreachable");
            RefreshFailure::NetworkFailure(e.to_string())
        })?;

        if !response.is_success() {
            let error_body = response
                .json::<TokenErrorResponse>()
                .map(|body| body.describe())
                .or_else(|_| response.text())
                .unwrap_or_else(|_| "unreadable error response".to_string());

            if matches!(response.status, 400 | 401) {
                warn!(status = response.status, error = %error_body, "Refresh secret rejected");
                *stored = None;
                return Err(RefreshFailure::RefreshDenied(format!(
                    "token endpoint returned {}: {}",
                    response.status, error_body
                )));
            }

            warn!(status = response.status, error = %error_body, "Token endpoint failed");
            return Err(RefreshFailure::NetworkFailure(format!(
                "token endpoint returned {}: {}",
                response.status, error_body
            )));
        }

        let token_response: TokenResponse = response.json().map_err(|e| {
            warn!(error = %e, "Unreadable token response");
            RefreshFailure::NetworkFailure(format!("failed to parse token response: {}", e))
        })?;

        if let Some(token_type) = token_response.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                warn!(token_type, "Token endpoint issued a non-bearer token type");
            }
        }

        if let Some(rotated) = token_response.refresh_token {
            debug!("Refresh secret rotated");
            *stored = Some(rotated);
        }

        let credential = match token_response.expires_in {
            Some(expires_in) => {
                let credential = Credential::expiring_in(token_response.access_token, expires_in);
                if credential.expires_at().is_none() {
                    warn!(expires_in, "Ignoring out-of-range expires_in");
                }
                credential
            }
            None => Credential::new(token_response.access_token),
        };

        info!(
            expires_in = ?token_response.expires_in,
            "Access token refreshed"
        );
        Ok(credential)
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{} ({})", self.error, description),
            None => self.error.clone(),
        }
    }
}
