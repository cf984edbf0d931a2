//! # Request Gateway
//!
//! Every outbound call to the protected API goes through [`AuthGateway`]. It
//! attaches the current credential, classifies the response, and recovers
//! from a rejected credential by refreshing once and replaying once.
//!
//! ## Per-request state machine
//!
//! ```text
//! Issuing ──> Completed
//! Issuing ──> AuthFailed ──> Refreshing ──> Retrying ──> Completed
//! Issuing ──> AuthFailed ──> Refreshing ──> RefreshFailed ──> Failed
//! Issuing ──> AuthFailed (replay) ──> Failed
//! ```
//!
//! Concurrent rejections share one refresh through the
//! [`RefreshCoordinator`]. A request is replayed at most once, so one
//! original call costs at most two transport calls.
//!
//! ## Example
//!
//! ```no_run
//! use bridge_traits::http::HttpMethod;
//! use core_auth::{AuthGateway, Credential, TokenStore};
//! use core_runtime::config::GatewayConfig;
//! # use std::sync::Arc;
//! # async fn example(refresher: Arc<dyn core_auth::TokenRefresher>) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let config = GatewayConfig::builder()
//!     .api_prefix("/api")
//!     .api_origin("https://cms.example.com")
//!     .build()?;
//!
//! let gateway = AuthGateway::new(config, TokenStore::new(), refresher);
//! gateway.sign_in(Credential::new("T0")).await;
//!
//! let response = gateway
//!     .dispatch(HttpMethod::Get, "/api/articles/5", Default::default(), None)
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

use crate::classify::{AuthFailureClassifier, ResponseClass};
use crate::error::{GatewayError, Result};
use crate::refresher::TokenRefresher;
use crate::request::PendingRequest;
use crate::scope::AuthScope;
use crate::single_flight::RefreshCoordinator;
use crate::token_store::TokenStore;
use crate::types::Credential;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpResponse};
use bytes::Bytes;
use core_runtime::config::GatewayConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, GatewayEvent};
use core_runtime::logging::strip_query;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What to do with a response.
enum Verdict {
    Done(Result<HttpResponse>),
    Refresh(HttpResponse),
}

/// Authenticating front for the protected API.
///
/// Safe to share between tasks (`Arc<AuthGateway>`).
pub struct AuthGateway {
    http_client: Arc<dyn HttpClient>,
    token_store: TokenStore,
    coordinator: RefreshCoordinator,
    classifier: AuthFailureClassifier,
    scope: AuthScope,
    request_timeout: Option<Duration>,
    event_bus: Option<EventBus>,
}

impl AuthGateway {
    /// Build a gateway from validated configuration.
    ///
    /// `refresher` must use its own transport, not this gateway.
    pub fn new(
        config: GatewayConfig,
        token_store: TokenStore,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(refresher, token_store.clone())
            .with_refresh_timeout(config.refresh_timeout);

        info!(
            api_prefix = %config.api_prefix,
            excluded = config.excluded_prefixes.len(),
            "Initializing AuthGateway"
        );

        Self {
            classifier: AuthFailureClassifier::from_config(&config),
            scope: AuthScope::from_config(&config),
            request_timeout: config.request_timeout,
            http_client: config.http_client,
            token_store,
            coordinator,
            event_bus: None,
        }
    }

    /// Publish auth and gateway events on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.coordinator = self.coordinator.with_event_bus(event_bus.clone());
        self.event_bus = Some(event_bus);
        self
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn scope(&self) -> &AuthScope {
        &self.scope
    }

    /// Install a credential obtained outside the gateway.
    pub async fn sign_in(&self, credential: Credential) {
        let expires_at = credential.expires_at_timestamp();
        self.token_store.set(credential).await;
        self.emit(CoreEvent::Auth(AuthEvent::CredentialStored { expires_at }));
    }

    /// Drop the current credential.
    pub async fn sign_out(&self) {
        if self.token_store.clear().await {
            self.emit(CoreEvent::Auth(AuthEvent::CredentialCleared {
                reason: "signed out".to_string(),
            }));
        }
    }

    /// Issue a call; shorthand for building a [`PendingRequest`] and [`send`](Self::send)ing it.
    pub async fn dispatch(
        &self,
        method: HttpMethod,
        target: impl Into<String>,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Result<HttpResponse> {
        let mut request = PendingRequest::new(method, target).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        self.send(request).await
    }

    /// Send `request`, refreshing and replaying once if its credential is rejected.
    ///
    /// A request that is already a replay is never refreshed again.
    #[instrument(
        skip(self, request),
        fields(
            request_id = %request.id(),
            method = %request.method(),
            target = %strip_query(request.target()),
        )
    )]
    pub async fn send(&self, request: PendingRequest) -> Result<HttpResponse> {
        let protected = self.is_protected(&request);
        let credential = if protected {
            self.token_store.get().await
        } else {
            None
        };

        debug!(
            protected,
            with_credential = credential.is_some(),
            retry = request.is_retry(),
            "Issuing request"
        );

        let response = match self.attempt(&request, credential.as_ref()).await {
            Ok(response) => response,
            Err(source) => {
                let error = transport_error(&request, source);
                return self.finish(&request, Err(error));
            }
        };

        match self.judge(&request, protected, response) {
            Verdict::Done(result) => self.finish(&request, result),
            Verdict::Refresh(original) => {
                let result = self.refresh_and_replay(&request, credential, original).await;
                self.finish(&request, result)
            }
        }
    }

    async fn refresh_and_replay(
        &self,
        request: &PendingRequest,
        rejected: Option<Credential>,
        original: HttpResponse,
    ) -> Result<HttpResponse> {
        debug!(status = original.status, "Credential rejected, refreshing");

        let ticket = self.coordinator.acquire_or_join_after(rejected.as_ref()).await;
        let ticket_id = ticket.id();
        let leader = ticket.is_leader();

        let credential = match ticket.resolve().await {
            Ok(credential) => credential,
            Err(failure) => {
                debug!(ticket = ticket_id, kind = %failure.kind(), "Refresh failed, not replaying");
                return Err(GatewayError::RefreshFailed {
                    target: request.target().to_string(),
                    failure,
                    original,
                });
            }
        };

        let replay = request.replay();
        debug!(ticket = ticket_id, leader, "Replaying with refreshed credential");
        self.emit(CoreEvent::Gateway(GatewayEvent::RequestReplayed {
            request_id: replay.id().to_string(),
            target: strip_query(replay.target()).to_string(),
        }));

        let response = self
            .attempt(&replay, Some(&credential))
            .await
            .map_err(|source| transport_error(&replay, source))?;

        match self.judge(&replay, true, response) {
            Verdict::Done(result) => result,
            Verdict::Refresh(response) => Err(unauthorized(&replay, response)),
        }
    }

    fn judge(&self, request: &PendingRequest, protected: bool, response: HttpResponse) -> Verdict {
        match self.classifier.classify(&response) {
            ResponseClass::Success => Verdict::Done(Ok(response)),
            ResponseClass::OtherFailure => Verdict::Done(Err(GatewayError::Status {
                target: request.target().to_string(),
                response,
            })),
            ResponseClass::AuthFailure if protected && !request.is_retry() => {
                Verdict::Refresh(response)
            }
            ResponseClass::AuthFailure => Verdict::Done(Err(unauthorized(request, response))),
        }
    }

    async fn attempt(
        &self,
        request: &PendingRequest,
        credential: Option<&Credential>,
    ) -> BridgeResult<HttpResponse> {
        let mut http_request = request.to_http_request(credential);
        http_request.url = self.scope.resolve_url(request.target());

        let limit = request.timeout_override().or(self.request_timeout);
        match limit {
            Some(limit) => {
                http_request.timeout = Some(limit);
                tokio::time::timeout(limit, self.http_client.execute(http_request))
                    .await
                    .unwrap_or(Err(BridgeError::Timeout(limit)))
            }
            None => self.http_client.execute(http_request).await,
        }
    }

    fn is_protected(&self, request: &PendingRequest) -> bool {
        !request.skips_auth() && self.scope.requires_auth(request.target())
    }

    fn finish(
        &self,
        request: &PendingRequest,
        result: Result<HttpResponse>,
    ) -> Result<HttpResponse> {
        if let Err(error) = &result {
            let kind = error.kind();
            warn!(kind = %kind, error = %error, "Request failed");
            self.emit(CoreEvent::Gateway(GatewayEvent::RequestRejected {
                request_id: request.id().to_string(),
                target: strip_query(request.target()).to_string(),
                kind: kind.to_string(),
            }));
        }
        result
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("scope", &self.scope)
            .field("classifier", &self.classifier)
            .field("request_timeout", &self.request_timeout)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

fn unauthorized(request: &PendingRequest, response: HttpResponse) -> GatewayError {
    GatewayError::Unauthorized {
        target: request.target().to_string(),
        response,
        replayed: request.is_retry(),
    }
}

fn transport_error(request: &PendingRequest, source: BridgeError) -> GatewayError {
    let target = request.target().to_string();
    if request.is_retry() {
        GatewayError::ReplayAborted { target, source }
    } else {
        GatewayError::Network { target, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, RefreshFailure};
    use crate::refresher::RefreshOutcome;
    use async_trait::async_trait;
    use bridge_traits::http::HttpRequest;
    use mockall::{mock, predicate::always, Sequence};

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    mock! {
        Refresher {}

        #[async_trait]
        impl TokenRefresher for Refresher {
            async fn refresh(&self) -> RefreshOutcome;
        }
    }

    fn gateway(client: MockHttpClient, refresher: MockRefresher, store: TokenStore) -> AuthGateway {
        let config = GatewayConfig::builder()
            .api_prefix("/api")
            .http_client(Arc::new(client))
            .build()
            .unwrap();
        AuthGateway::new(config, store, Arc::new(refresher))
    }

    fn no_refresh() -> MockRefresher {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh().times(0);
        refresher
    }

    fn bearer(token: &'static str) -> impl Fn(&HttpRequest) -> bool {
        move |request| request.authorization() == Some(&format!("Bearer {}", token)[..])
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .withf(bearer("T1"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "article")));

        let gateway = gateway(
            client,
            no_refresh(),
            TokenStore::with_credential(Credential::new("T1")),
        );
        let response = gateway
            .dispatch(HttpMethod::Get, "/api/articles/5", HashMap::new(), None)
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), "article");
    }

    #[tokio::test]
    async fn test_other_failure_is_not_retried() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(500, "boom")));

        let gateway = gateway(
            client,
            no_refresh(),
            TokenStore::with_credential(Credential::new("T1")),
        );
        let error = gateway
            .dispatch(HttpMethod::Get, "/api/articles/5", HashMap::new(), None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), FailureKind::OtherFailure);
        assert_eq!(error.original_response().unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_and_replays_once() {
        let mut seq = Sequence::new();
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .withf(bearer("T0"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(401, "")));
        client
            .expect_execute()
            .withf(bearer("T1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, "ok")));

        let mut refresher = MockRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok(Credential::new("T1")));

        let store = TokenStore::with_credential(Credential::new("T0"));
        let gateway = gateway(client, refresher, store.clone());

        let response = gateway
            .dispatch(HttpMethod::Get, "/api/articles/5", HashMap::new(), None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(store.get().await, Some(Credential::new("T1")));
    }

    #[tokio::test]
    async fn test_replay_rejection_is_surfaced_without_second_refresh() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(401, "still no")));

        let mut refresher = MockRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok(Credential::new("T1")));

        let gateway = gateway(client, refresher, TokenStore::new());
        let error = gateway
            .dispatch(HttpMethod::Get, "/api/articles/5", HashMap::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            GatewayError::Unauthorized { replayed: true, .. }
        ));
        assert_eq!(error.kind(), FailureKind::AuthFailure);
    }

    #[tokio::test]
    async fn test_refresh_failure_rejects_with_original_response() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, "expired")));

        let mut refresher = MockRefresher::new();
        refresher.expect_refresh().times(1).returning(|| {
            Err(RefreshFailure::InteractiveAuthRequired(
                "sign-in was cancelled".into(),
            ))
        });

        let gateway = gateway(client, refresher, TokenStore::new());
        let error = gateway
            .dispatch(HttpMethod::Get, "/api/articles/5", HashMap::new(), None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), FailureKind::InteractiveAuthRequired);
        assert_eq!(error.original_response().unwrap().text().unwrap(), "expired");
    }

    #[tokio::test]
    async fn test_unprotected_targets_get_no_credential_and_no_refresh() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .withf(|request| request.authorization().is_none())
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, "")));

        let gateway = gateway(
            client,
            no_refresh(),
            TokenStore::with_credential(Credential::new("T1")),
        );
        let error = gateway
            .dispatch(HttpMethod::Get, "/assets/logo.png", HashMap::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            GatewayError::Unauthorized {
                replayed: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_skip_auth_keeps_caller_header() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .withf(|request| request.authorization() == Some("Basic dXNlcjpwYXNz"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "")));

        let gateway = gateway(
            client,
            no_refresh(),
            TokenStore::with_credential(Credential::new("T1")),
        );
        let request = PendingRequest::new(HttpMethod::Post, "/api/login")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .skip_auth();

        assert!(gateway.send(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_error_on_first_attempt_is_network_failure() {
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .with(always())
            .times(1)
            .returning(|_| Err(BridgeError::Connection("reset".into())));

        let gateway = gateway(client, no_refresh(), TokenStore::new());
        let error = gateway
            .dispatch(HttpMethod::Get, "/api/articles", HashMap::new(), None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), FailureKind::NetworkFailure);
    }

    #[tokio::test]
    async fn test_transport_error_on_replay_is_other_failure() {
        let mut seq = Sequence::new();
        let mut client = MockHttpClient::new();
        client
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(401, "")));
        client
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BridgeError::Cancelled("shutdown".into())));

        let mut refresher = MockRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok(Credential::new("T1")));

        let gateway = gateway(client, refresher, TokenStore::new());
        let error = gateway
            .dispatch(HttpMethod::Get, "/api/articles", HashMap::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::ReplayAborted { .. }));
        assert_eq!(error.kind(), FailureKind::OtherFailure);
    }

    #[tokio::test]
    async fn test_sign_in_and_sign_out_emit_events() {
        let gateway = gateway(MockHttpClient::new(), no_refresh(), TokenStore::new())
            .with_event_bus(EventBus::new(8));
        let mut events = gateway.event_bus.as_ref().unwrap().subscribe();

        gateway.sign_in(Credential::new("T1")).await;
        gateway.sign_out().await;
        gateway.sign_out().await;

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::CredentialStored { expires_at: None })
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::CredentialCleared {
                reason: "signed out".into()
            })
        );
        assert!(events.try_recv().is_err());
        assert!(gateway.token_store().is_empty().await);
    }
}
