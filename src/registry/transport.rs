//! HTTP transport chain for registry access
//!
//! Requests flow outermost to innermost through:
//! - [`DebugTransport`] (only with `--debug`): logs requests and responses
//! - the retry wrapper, [`RetryTransport`] unless the caller supplies another
//! - [`HttpTransport`]: reqwest clients carrying the TLS policy and dial overrides
//!
//! Every layer speaks [`Transport`], so layers can be swapped or stacked freely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, HOST, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Request, Response, StatusCode};

use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::net::{Dialer, LoadedTlsPolicy, Route};

const REDACTED: &str = "*****";

/// One round trip: a request in, a response (of any status) out
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request) -> Result<Response>;
}

/// Wraps a transport with retry behavior
pub type TransportWrapper = Arc<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Innermost transport. Requests whose `host:port` has an override go through a
/// client pinned to the override address; everything else uses the base client.
pub struct HttpTransport {
    base: Client,
    overrides: HashMap<(String, u16), Client>,
    dialer: Dialer,
}

impl HttpTransport {
    pub fn new(tls: &LoadedTlsPolicy, dialer: Dialer) -> Result<Self> {
        let base = tls.apply(Client::builder()).build()?;

        let mut overrides = HashMap::with_capacity(dialer.len());
        for (host, port, address) in dialer.entries() {
            // resolver overrides ignore the port, the request URL carries it instead
            let client = tls.apply(Client::builder()).resolve(host, address).build()?;
            overrides.insert((host.to_string(), port), client);
        }

        Ok(Self {
            base,
            overrides,
            dialer,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let target = request
            .url()
            .host_str()
            .zip(request.url().port_or_known_default())
            .map(|(host, port)| (host.to_ascii_lowercase(), port));
        let Some((host, port)) = target else {
            return Ok(self.base.execute(request).await?);
        };

        let address = match self.dialer.route(&host, port) {
            Route::Direct => return Ok(self.base.execute(request).await?),
            Route::Override(address) => address,
        };
        let Some(client) = self.overrides.get(&(host.clone(), port)) else {
            return Ok(self.base.execute(request).await?);
        };

        if address.port() != port {
            // keep the Host header and TLS server name on the requested authority
            if !request.headers().contains_key(HOST) {
                let authority = match request.url().port() {
                    Some(explicit) => format!("{}:{}", host, explicit),
                    None => host.clone(),
                };
                if let Ok(value) = HeaderValue::from_str(&authority) {
                    request.headers_mut().insert(HOST, value);
                }
            }
            request.url_mut().set_port(Some(address.port())).map_err(|_| {
                TargetError::Validation(format!("cannot redirect {} to {}", host, address))
            })?;
        }
        Ok(client.execute(request).await?)
    }
}

/// Backoff settings for [`RetryTransport`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_wait: Duration::from_millis(200),
            max_wait: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .min_wait
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_wait);
        let jitter_factor: f64 = rand::thread_rng().gen_range(0.8_f64..=1.2_f64);
        base.mul_f64(jitter_factor)
    }
}

/// Replays idempotent requests after transient failures
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Default wrapper used when the caller supplies none
    pub fn wrapper(policy: RetryPolicy) -> TransportWrapper {
        Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
            Arc::new(RetryTransport::new(inner, policy.clone()))
        })
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &TargetError) -> bool {
    match err {
        TargetError::Transport(err) => err.is_connect() || err.is_timeout(),
        _ => false,
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        if !is_idempotent(request.method()) {
            return self.inner.round_trip(request).await;
        }

        let mut attempt = 0;
        let mut pending = request;
        loop {
            attempt += 1;
            // streaming bodies cannot be replayed
            let replay = if attempt < self.policy.max_attempts {
                pending.try_clone()
            } else {
                None
            };

            let outcome = self.inner.round_trip(pending).await;
            let retry = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(err) => is_retryable_error(err),
            };
            match replay {
                Some(next) if retry => {
                    tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
                    pending = next;
                }
                _ => return outcome,
            }
        }
    }
}

/// Logs every request and response through the injected logger
pub struct DebugTransport {
    inner: Arc<dyn Transport>,
    logger: Logger,
}

impl DebugTransport {
    pub fn new(inner: Arc<dyn Transport>, logger: Logger) -> Self {
        Self { inner, logger }
    }
}

#[async_trait]
impl Transport for DebugTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let url = request.url().clone();
        self.logger.debug(&format!(
            "request method={} url={}\n{}",
            request.method(),
            url,
            format_headers(request.headers())
        ));

        let outcome = self.inner.round_trip(request).await;
        match &outcome {
            Ok(response) => self.logger.debug(&format!(
                "response status=\"{}\" url={}\n{}",
                response.status(),
                url,
                format_headers(response.headers())
            )),
            Err(err) if err.is_no_response() => self
                .logger
                .error(&format!("no response obtained for request url={}: {}", url, err)),
            Err(err) => self
                .logger
                .error(&format!("error in getting response url={}: {}", url, err)),
        }
        outcome
    }
}

/// Render headers one per line with `Authorization` masked
pub fn format_headers(headers: &HeaderMap) -> String {
    if headers.is_empty() {
        return "   Empty header".to_string();
    }
    let mut lines: Vec<String> = headers
        .keys()
        .map(|name| {
            let value = if *name == AUTHORIZATION {
                REDACTED.to_string()
            } else {
                headers
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!("   {:?}: {:?}", name.as_str(), value)
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_headers_masks_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret-token"));
        headers.append("x-foo", HeaderValue::from_static("bar"));
        headers.append("x-foo", HeaderValue::from_static("baz"));

        let rendered = format_headers(&headers);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains(r#""authorization": "*****""#));
        assert!(rendered.contains(r#""x-foo": "bar, baz""#));
    }

    #[test]
    fn test_format_empty_headers() {
        assert_eq!(format_headers(&HeaderMap::new()), "   Empty header");
    }

    #[test]
    fn test_retry_classification() {
        assert!(is_idempotent(&Method::GET));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(400),
        };
        assert!(policy.backoff(0) <= Duration::from_millis(120));
        assert!(policy.backoff(10) <= Duration::from_millis(480));
    }
}
