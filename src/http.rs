// src/http.rs
//
// HTTP client component: GET (optionally ranged) requests against object
// URLs with an explicit retry policy. This is the only layer that retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::{debug, warn, Instrument, Span};

use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_STATUSES};
use crate::driver::{ByteRange, Session, Timeouts};
use crate::errors::{DriverError, DriverResult};

/// When and how often a request is replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per request, first try included
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled afterwards
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(DEFAULT_RETRY_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(100),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }

    pub fn none() -> Self {
        Self::with_attempts(1)
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay after the `attempt`-th (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    span: Span,
}

impl HttpClient {
    pub fn new(timeouts: Timeouts, retry: RetryPolicy, pool_size: usize) -> DriverResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            // Idle pool only; active requests are bounded by HttpSession
            .pool_max_idle_per_host(pool_size.max(1))
            .build()
            .map_err(|e| DriverError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            retry,
            span: tracing::debug_span!("http", pool = pool_size),
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// GET `url`, drain the body and return its length.
    pub async fn fetch(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url, range).await {
                Ok(n) => return Ok(n),
                Err(e) if attempt < self.retry.max_attempts && self.is_retryable(&e) => {
                    let delay = self.retry.delay(attempt);
                    warn!(parent: &self.span, url, attempt, "retrying after {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let mut response = request
            .send()
            .instrument(self.span.clone())
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            received += chunk.len() as u64;
        }
        debug!(parent: &self.span, url, status = status.as_u16(), received, "fetched");
        Ok(received)
    }

    fn is_retryable(&self, err: &DriverError) -> bool {
        match err {
            DriverError::Connection(_)
            | DriverError::ConnectionTimeout(_)
            | DriverError::ReadTimeout(_) => true,
            DriverError::RateLimit(_) => self.retry.retries_status(429),
            DriverError::InvalidHttpCode { status, .. } => self.retry.retries_status(*status),
            _ => false,
        }
    }
}

fn status_error(status: StatusCode, url: &str) -> DriverError {
    let detail = format!(
        "{} {}",
        status.canonical_reason().unwrap_or("unknown status"),
        url
    );
    DriverError::from_status(status.as_u16(), detail)
}

fn classify(err: reqwest::Error) -> DriverError {
    if err.is_timeout() {
        if err.is_connect() {
            DriverError::ConnectionTimeout(err.to_string())
        } else {
            DriverError::ReadTimeout(err.to_string())
        }
    } else if err.is_connect() || err.is_request() {
        DriverError::Connection(err.to_string())
    } else if err.is_builder() {
        DriverError::Config(err.to_string())
    } else {
        DriverError::Connection(err.to_string())
    }
}

/// `Session` backed by a shared HTTP client.
///
/// reqwest only caps idle connections, so the session holds one permit per
/// request to keep at most `max_connections` requests on the wire.
pub struct HttpSession {
    client: Arc<HttpClient>,
    permits: Arc<Semaphore>,
}

impl HttpSession {
    pub fn new(client: Arc<HttpClient>, max_connections: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| DriverError::ClientCapacity(e.to_string()))?;
        self.client.fetch(url, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const BODY_LEN: usize = 1000;

    /// Minimal HTTP/1.1 responder: `/ok` serves BODY_LEN bytes (honouring a
    /// range), `/flaky` fails with 503 once, anything else is a 404.
    async fn spawn_responder() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let flaky_hits = Arc::new(AtomicUsize::new(0));
        let hits = flaky_hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let hits = hits.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut tmp = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut tmp).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&tmp[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf).to_lowercase();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                    let (status, body_len) = match path.as_str() {
                        "/ok" => {
                            let len = request
                                .lines()
                                .find_map(|l| l.strip_prefix("range: bytes="))
                                .and_then(|r| r.trim().split_once('-'))
                                .map(|(s, e)| e.parse::<usize>().unwrap() - s.parse::<usize>().unwrap() + 1)
                                .unwrap_or(BODY_LEN);
                            ("200 OK", len)
                        }
                        "/flaky" if hits.fetch_add(1, Ordering::SeqCst) == 0 => ("503 Service Unavailable", 0),
                        "/flaky" => ("200 OK", 10),
                        _ => ("404 Not Found", 0),
                    };
                    let head = format!(
                        "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        status, body_len
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&vec![b'x'; body_len]).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        (format!("http://{}", addr), flaky_hits)
    }

    fn client(retry: RetryPolicy) -> HttpClient {
        let timeouts = Timeouts {
            connect: Duration::from_secs(2),
            read: Duration::from_secs(2),
        };
        HttpClient::new(timeouts, retry, 1).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_counts_body_bytes() {
        let (base, _) = spawn_responder().await;
        let n = client(RetryPolicy::none()).fetch(&format!("{}/ok", base), None).await.unwrap();
        assert_eq!(n, BODY_LEN as u64);
    }

    #[tokio::test]
    async fn test_fetch_range() {
        let (base, _) = spawn_responder().await;
        let range = ByteRange { start: 100, end: 199 };
        let n = client(RetryPolicy::none())
            .fetch(&format!("{}/ok", base), Some(range))
            .await
            .unwrap();
        assert_eq!(n, 100);
    }

    #[tokio::test]
    async fn test_not_found_is_classified_by_status() {
        let (base, _) = spawn_responder().await;
        let err = client(RetryPolicy::default())
            .fetch(&format!("{}/missing", base), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHttpCode);
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_retry_on_listed_status() {
        let (base, hits) = spawn_responder().await;
        let mut retry = RetryPolicy::with_attempts(2);
        retry.backoff = Duration::from_millis(1);
        let n = client(retry).fetch(&format!("{}/flaky", base), None).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_without_attempts() {
        let (base, hits) = spawn_responder().await;
        let err = client(RetryPolicy::none())
            .fetch(&format!("{}/flaky", base), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(RetryPolicy::none())
            .fetch(&format!("http://{}/ok", addr), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_session_bounds_requests_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_srv, peak_srv) = (active.clone(), peak.clone());
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let active = active_srv.clone();
                let peak = peak_srv.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    let _ = sock
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\nconnection: close\r\n\r\nabc")
                        .await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        let session = HttpSession::new(Arc::new(client(RetryPolicy::none())), 1);
        let url = format!("http://{}/x", addr);
        let fetches = (0..4).map(|_| session.fetch(&url, None));
        let results = futures::future::join_all(fetches).await;
        assert!(results.iter().all(|r| matches!(r, Ok(3))));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert!(policy.retries_status(503));
        assert!(!policy.retries_status(404));
    }
}
