//! `HttpClient` over reqwest + rustls.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ProxyConfig, RetryPolicy},
};
use parking_lot::RwLock;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("radio-core/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared desktop HTTP transport.
///
/// Throttling (429) and 5xx responses are retried per [`RetryPolicy`];
/// anything else comes back as a response value. A proxy change rebuilds
/// the inner client, and requests already in flight finish on the old one.
pub struct ReqwestHttpClient {
    client: RwLock<Client>,
    timeout: Duration,
}

/// Outcome of one round trip.
enum Attempt {
    Done(HttpResponse),
    Retry(BridgeError),
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: RwLock::new(build_client(timeout, None)?),
            timeout,
        })
    }

    async fn attempt(client: &Client, request: &HttpRequest) -> Result<Attempt> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Ok(Attempt::Retry(transport_error(err))),
        };

        let status = response.status().as_u16();
        if RetryPolicy::is_retryable_status(status) {
            return Ok(Attempt::Retry(BridgeError::OperationFailed(format!(
                "HTTP {}",
                status
            ))));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(Attempt::Done(HttpResponse {
            status,
            headers,
            body,
        }))
    }
}

fn build_client(timeout: Duration, proxy: Option<&ProxyConfig>) -> Result<Client> {
    let builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT);

    let builder = match proxy {
        None => builder.no_proxy(),
        Some(config) => {
            let mut route = reqwest::Proxy::all(config.url()).map_err(|e| {
                BridgeError::OperationFailed(format!("invalid proxy {}: {}", config.url(), e))
            })?;
            if let Some((user, pass)) = config.credentials() {
                route = route.basic_auth(user, pass);
            }
            builder.proxy(route)
        }
    };

    builder
        .build()
        .map_err(|e| BridgeError::OperationFailed(format!("HTTP client setup failed: {}", e)))
}

fn transport_error(err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Network("request timed out".to_string())
    } else if err.is_connect() {
        BridgeError::Network(format!("connect failed: {}", err))
    } else {
        BridgeError::OperationFailed(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let client = self.client.read().clone();
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(attempt, attempts, method = request.method.as_str(), "HTTP request");

            let err = match Self::attempt(&client, &request).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::Retry(err) => err,
            };

            if attempt >= attempts {
                warn!(attempt, error = %err, "HTTP request gave up");
                return Err(err);
            }

            attempt += 1;
            let delay = policy.delay_before(attempt);
            warn!(error = %err, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "HTTP request will retry");
            tokio::time::sleep(delay).await;
        }
    }

    async fn configure_proxy(&self, proxy: Option<ProxyConfig>) -> Result<()> {
        let rebuilt = build_client(self.timeout, proxy.as_ref())?;
        *self.client.write() = rebuilt;

        match proxy {
            Some(config) => info!(host = %config.host, port = config.port, "Proxy enabled"),
            None => info!("Proxy disabled"),
        }
        Ok(())
    }
}
