//! Upstream event-stream sources
//!
//! The relay only sees [`UpstreamSource`]; the HTTP client and the retry
//! policy are layered implementations of it.

#[cfg(test)]
pub mod testing;

use crate::relay::{RelayError, SessionId};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;

/// Path under the upstream base URL that serves a session's event stream
pub const UPSTREAM_STREAM_PATH: [&str; 3] = ["api", "sse", "connect"];

/// Body of an established upstream stream
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

/// Opens the upstream event stream for a session
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn connect(&self, session: &SessionId) -> Result<ByteStream, RelayError>;
}

/// Streaming GET against the backend
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
}

impl HttpUpstream {
    pub fn new(base_url: Url, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        // No overall timeout: the body is long-lived. The relay bounds the header wait and idle reads.
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `<base>/api/sse/connect/<session>`, with the session as one path segment
    pub fn stream_url(&self, session: &SessionId) -> Result<Url, RelayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RelayError::rejected(format!("Upstream base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(UPSTREAM_STREAM_PATH)
            .push(session.as_str());
        Ok(url)
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstream {
    async fn connect(&self, session: &SessionId) -> Result<ByteStream, RelayError> {
        let url = self.stream_url(session)?;
        tracing::info!(url = %url, "Connecting upstream");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| RelayError::from_connect(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::from_status(status));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| RelayError::stream_read(format!("Upstream read failed: {e}")))
            .boxed())
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Retries retryable connect failures of the inner source
pub struct RetryingUpstream {
    inner: Arc<dyn UpstreamSource>,
    policy: RetryPolicy,
}

impl RetryingUpstream {
    pub fn new(inner: Arc<dyn UpstreamSource>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl UpstreamSource for RetryingUpstream {
    async fn connect(&self, session: &SessionId) -> Result<ByteStream, RelayError> {
        let mut attempt = 1;
        loop {
            match self.inner.connect(session).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Upstream connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedUpstream;
    use super::*;
    use crate::relay::RelayErrorKind;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Mutex;

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).unwrap()
    }

    #[test]
    fn test_stream_url() {
        let upstream =
            HttpUpstream::new(Url::parse("http://backend:8080/").unwrap(), Duration::from_secs(1)).unwrap();
        let url = upstream.stream_url(&session("abc")).unwrap();
        assert_eq!(url.as_str(), "http://backend:8080/api/sse/connect/abc");

        let upstream =
            HttpUpstream::new(Url::parse("http://backend/prefix").unwrap(), Duration::from_secs(1)).unwrap();
        let url = upstream.stream_url(&session("a b/c")).unwrap();
        assert_eq!(url.as_str(), "http://backend/prefix/api/sse/connect/a%20b%2Fc");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
        };
        let delays: Vec<u64> = (1..=6).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
    }

    #[tokio::test]
    async fn test_http_upstream_streams_body() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        let app = Router::new().route(
            "/api/sse/connect/:id",
            get(move |Path(id): Path<String>, headers: HeaderMap| {
                let seen = seen_in_handler.clone();
                async move {
                    let accept = headers
                        .get("accept")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    seen.lock().unwrap().push((id, accept));
                    "data: {\"token\": \"hi\"}\n\n"
                }
            }),
        );
        let base = serve(app).await;

        let upstream = HttpUpstream::new(base, Duration::from_secs(5)).unwrap();
        let stream = upstream.connect(&session("s-1")).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();

        assert_eq!(body, b"data: {\"token\": \"hi\"}\n\n");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("s-1".to_string(), "text/event-stream".to_string())]
        );
    }

    #[tokio::test]
    async fn test_http_upstream_status_errors() {
        let app = Router::new().route(
            "/api/sse/connect/:id",
            get(|Path(id): Path<String>| async move {
                if id == "missing" {
                    StatusCode::NOT_FOUND.into_response()
                } else {
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                }
            }),
        );
        let base = serve(app).await;
        let upstream = HttpUpstream::new(base, Duration::from_secs(5)).unwrap();

        let err = upstream.connect(&session("missing")).await.err().unwrap();
        assert_eq!(err.kind, RelayErrorKind::Rejected);
        assert_eq!(err.message, "Upstream connection failed: 404 Not Found");

        let err = upstream.connect(&session("busy")).await.err().unwrap();
        assert_eq!(err.kind, RelayErrorKind::ServerError);
    }

    #[tokio::test]
    async fn test_http_upstream_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let upstream = HttpUpstream::new(base, Duration::from_secs(1)).unwrap();
        let err = upstream.connect(&session("s")).await.err().unwrap();
        assert_eq!(err.kind, RelayErrorKind::Network);
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_retryable_failures() {
        let inner = Arc::new(
            ScriptedUpstream::new()
                .fail(RelayError::network("refused"))
                .fail(RelayError::server_error("503"))
                .lines(&["data: {}"]),
        );
        let retrying = RetryingUpstream::new(inner.clone(), fast_policy(3));

        assert!(retrying.connect(&session("s")).await.is_ok());
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let inner = Arc::new(
            ScriptedUpstream::new()
                .fail(RelayError::network("refused"))
                .fail(RelayError::network("refused"))
                .lines(&["data: {}"]),
        );
        let retrying = RetryingUpstream::new(inner.clone(), fast_policy(2));

        let err = retrying.connect(&session("s")).await.err().unwrap();
        assert_eq!(err.kind, RelayErrorKind::Network);
        assert_eq!(inner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_non_retryable() {
        let inner = Arc::new(
            ScriptedUpstream::new()
                .fail(RelayError::rejected("404"))
                .lines(&["data: {}"]),
        );
        let retrying = RetryingUpstream::new(inner.clone(), fast_policy(5));

        let err = retrying.connect(&session("s")).await.err().unwrap();
        assert_eq!(err.kind, RelayErrorKind::Rejected);
        assert_eq!(inner.call_count(), 1);
    }
}
