//! Desktop transport for the gateway.
//!
//! ```ignore
//! let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new());
//! let config = GatewayConfig::builder().http_client(client).build()?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
