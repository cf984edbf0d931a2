//! Gateway walkthrough against a local mock API
//!
//! Starts a wiremock server that plays the protected API and its OAuth token
//! endpoint, then sends three concurrent requests with an expired token. One
//! refresh is performed and every request is replayed with the new token.
//!
//! Run with:
//! ```bash
//! cargo run -p core-auth --example gateway_demo
//!
//! # JSON logs
//! cargo run -p core-auth --example gateway_demo -- json
//! ```

use anyhow::Context;
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::http::{HttpClient, HttpMethod};
use bridge_traits::logging::LogLevel;
use core_auth::{AuthGateway, Credential, OAuthConfig, SilentRefresher, TokenStore};
use core_runtime::config::GatewayConfig;
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tracing::info;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut logging = LoggingConfig::from_env().with_level(LogLevel::Debug);
    if let Some(format) = env::args().nth(1) {
        logging = logging.with_format(format.parse::<LogFormat>()?);
    }
    init_logging(logging).context("failed to initialize logging")?;

    let server = start_mock_cms().await;

    let oauth = OAuthConfig::new("authoring-app", format!("{}/oauth/v2/token", server.uri()));
    let oauth_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let refresher = Arc::new(SilentRefresher::new(oauth, oauth_client, "stored-secret"));

    let api_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let config = GatewayConfig::builder()
        .api_prefix("/api")
        .api_origin(server.uri())
        .exclude_from_auth("/api/public")
        .http_client(api_client)
        .build()?;

    let bus = EventBus::new(32);
    let mut events = EventStream::new(bus.subscribe());
    let gateway =
        Arc::new(AuthGateway::new(config, TokenStore::new(), refresher).with_event_bus(bus));

    gateway.sign_in(Credential::new("expired")).await;

    let requests = (1..=3).map(|id| {
        let gateway = Arc::clone(&gateway);
        async move {
            gateway
                .dispatch(
                    HttpMethod::Get,
                    format!("/api/articles/{}", id),
                    HashMap::new(),
                    None,
                )
                .await
        }
    });
    for result in futures::future::join_all(requests).await {
        let response = result?;
        info!(status = response.status, body = %response.text()?, "Response");
    }

    let logo = gateway
        .dispatch(HttpMethod::Get, "/api/public/logo.svg", HashMap::new(), None)
        .await?;
    info!(status = logo.status, "Public asset fetched without a credential");

    info!(
        refreshes = gateway.coordinator().refreshes_started(),
        "Refreshes performed"
    );
    while let Some(Ok(event)) = events.try_recv() {
        info!(event = %event.description(), severity = ?event.severity(), "Event");
    }

    gateway.sign_out().await;
    Ok(())
}

async fn start_mock_cms() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/articles/\d+$"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"title":"Hello"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/articles/\d+$"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/public/logo.svg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<svg/>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    server
}
