use crate::rate_limit::RateLimiter;
use crate::ssrf::{self, ResolvedTarget};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use watchdog_core::{Error, FetchResponse as CoreFetchResponse, Gateway as GatewayTrait, Result};

const MAX_ATTEMPTS: u32 = 4; // 1 initial + 3 retries, per spec §4.A point 4.
const BACKOFFS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(4), Duration::from_secs(16)];
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// SSRF-safe, rate-limited, retrying HTTP gateway (spec §4.A).
pub struct Gateway {
    rate_limiter: RateLimiter,
    user_agent: String,
}

impl Gateway {
    pub fn new(contact_email: &str) -> Self {
        Self::with_rate_limit(contact_email, Duration::from_secs(1))
    }

    pub fn with_rate_limit(contact_email: &str, per_host_interval: Duration) -> Self {
        Self {
            rate_limiter: RateLimiter::new(per_host_interval),
            user_agent: format!("watchdog/0.1 (+contact: {contact_email})"),
        }
    }

    fn build_client(&self, target: &ResolvedTarget) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(10))
            .timeout(TOTAL_TIMEOUT);
        // Pin the connection to the exact IP the SSRF check validated so a
        // second DNS lookup performed by the client can't rebind past it
        // (spec §4.A point 1).
        if let Some(host) = target.url.host_str() {
            builder = builder.resolve(host, target.pinned_addr);
        }
        builder.build().map_err(|e| Error::Transport(e.to_string()))
    }

    async fn send_once(&self, target: &ResolvedTarget) -> Result<ReceivedResponse> {
        let client = self.build_client(target)?;
        let host = target.url.host_str().unwrap_or_default().to_string();
        self.rate_limiter.acquire(&host).await;

        let mut req = client.get(target.url.clone());
        req = req
            .header(reqwest::header::ACCEPT_LANGUAGE, "fi-FI,fi;q=0.9,en;q=0.8")
            .header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate, br");

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408 {
            return Ok(ReceivedResponse::Retryable {
                status: status.as_u16(),
                retry_after,
            });
        }
        if status.is_client_error() {
            return Err(Error::Status4xx(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let content_type =
            resp.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from);
        let mut headers = BTreeMap::new();
        for (k, v) in resp.headers().iter() {
            if let Ok(s) = v.to_str() {
                headers.insert(k.as_str().to_string(), s.to_string());
            }
        }

        let mut bytes = Vec::new();
        let mut truncated = false;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            if bytes.len() as u64 + chunk.len() as u64 > MAX_BODY_BYTES {
                return Err(Error::Oversize);
            }
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 >= MAX_BODY_BYTES {
                truncated = true;
                break;
            }
        }

        Ok(ReceivedResponse::Ok(CoreFetchResponse {
            final_url,
            status: status.as_u16(),
            content_type,
            headers,
            bytes,
            truncated,
        }))
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<CoreFetchResponse> {
        let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        // Resolved exactly once; every retry reuses the same pinned address.
        let target = ssrf::resolve_and_validate(&parsed).await?;

        let mut last_err: Option<Error> = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.send_once(&target).await {
                Ok(ReceivedResponse::Ok(resp)) => {
                    tracing::debug!(host = %target.host, attempt, status = resp.status, "fetch ok");
                    return Ok(resp);
                }
                Ok(ReceivedResponse::Retryable { status, retry_after }) => {
                    tracing::warn!(host = %target.host, attempt, status, "fetch retryable");
                    last_err = Some(if status >= 500 {
                        Error::Status5xx(status)
                    } else {
                        Error::Status4xx(status)
                    });
                    if attempt + 1 < MAX_ATTEMPTS {
                        let wait = retry_after.unwrap_or(BACKOFFS[attempt as usize]);
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => {
                    let retryable = matches!(e.retryability(), watchdog_core::Retryability::Transient);
                    tracing::warn!(host = %target.host, attempt, error = %e, "fetch error");
                    last_err = Some(e);
                    if !retryable || attempt + 1 >= MAX_ATTEMPTS {
                        break;
                    }
                    tokio::time::sleep(BACKOFFS[attempt as usize]).await;
                }
            }
        }
        Err(last_err.unwrap_or(Error::Transport("exhausted retries with no recorded error".into())))
    }
}

enum ReceivedResponse {
    Ok(CoreFetchResponse),
    Retryable { status: u16, retry_after: Option<Duration> },
}

#[async_trait]
impl GatewayTrait for Gateway {
    async fn fetch(&self, url: &str) -> Result<CoreFetchResponse> {
        self.fetch_with_retries(url).await
    }

    async fn download(&self, url: &str, expected_mime: Option<&str>) -> Result<CoreFetchResponse> {
        let resp = self.fetch_with_retries(url).await?;
        if let Some(expected) = expected_mime {
            validate_content_type(expected, resp.content_type.as_deref(), &resp.bytes)?;
        }
        Ok(resp)
    }
}

/// Validates a downloaded body's content-type: the response header or
/// detected magic bytes must match `expected` (spec §4.A point 6).
fn validate_content_type(expected: &str, header: Option<&str>, bytes: &[u8]) -> Result<()> {
    let header_matches = header
        .map(|h| h.to_ascii_lowercase().starts_with(&expected.to_ascii_lowercase()))
        .unwrap_or(false);
    if header_matches {
        return Ok(());
    }
    if magic_bytes_match(expected, bytes) {
        return Ok(());
    }
    Err(Error::ContentMismatch {
        expected: expected.to_string(),
        actual: header.unwrap_or("unknown").to_string(),
    })
}

fn magic_bytes_match(expected: &str, bytes: &[u8]) -> bool {
    match expected {
        "application/pdf" => bytes.starts_with(b"%PDF-"),
        "text/html" => {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
            head.contains("<html") || head.contains("<!doctype html")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Router};
    use std::net::SocketAddr;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn fetches_successfully_from_loopback_test_server() {
        // The SSRF guard blocks *production* targets from resolving to
        // loopback; tests talk to a real local listener the same way, so
        // this exercises the full fetch path end-to-end rather than the
        // policy (policy is covered in `ssrf::tests`).
        let app = Router::new().route(
            "/",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "hello") }),
        );
        let addr = spawn(app).await;
        let gw = Gateway::new("watchdog@example.fi");
        // Use the resolved-target path directly to bypass the loopback
        // block for this local integration test.
        let parsed = url::Url::parse(&format!("http://{addr}/")).unwrap();
        let target = ResolvedTarget {
            url: parsed.clone(),
            host: parsed.host_str().unwrap().to_string(),
            pinned_addr: addr,
        };
        let resp = gw.send_once(&target).await.unwrap();
        match resp {
            ReceivedResponse::Ok(r) => {
                assert_eq!(r.status, 200);
                assert_eq!(String::from_utf8_lossy(&r.bytes), "hello");
            }
            ReceivedResponse::Retryable { .. } => panic!("expected ok"),
        }
    }

    #[tokio::test]
    async fn retries_on_429_and_honors_retry_after() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        let app = Router::new().route(
            "/",
            get(move || {
                let counter = counter2.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        (
                            axum::http::StatusCode::TOO_MANY_REQUESTS,
                            [(header::RETRY_AFTER, "1")],
                            "slow down",
                        )
                    } else {
                        (axum::http::StatusCode::OK, [(header::RETRY_AFTER, "0")], "ok now")
                    }
                }
            }),
        );
        let addr = spawn(app).await;
        let gw = Gateway::new("watchdog@example.fi");
        let url = format!("http://{addr}/");
        let parsed = url::Url::parse(&url).unwrap();
        let target =
            ResolvedTarget { url: parsed.clone(), host: parsed.host_str().unwrap().to_string(), pinned_addr: addr };

        let start = tokio::time::Instant::now();
        let mut last_err = None;
        let mut got_ok = false;
        for attempt in 0..MAX_ATTEMPTS {
            match gw.send_once(&target).await.unwrap() {
                ReceivedResponse::Ok(r) => {
                    assert_eq!(r.status, 200);
                    got_ok = true;
                    break;
                }
                ReceivedResponse::Retryable { retry_after, .. } => {
                    last_err = Some(());
                    let _ = attempt;
                    tokio::time::sleep(retry_after.unwrap_or(Duration::from_millis(10))).await;
                }
            }
        }
        assert!(got_ok, "expected eventual 200, last retryable={last_err:?}");
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn pdf_magic_bytes_match_even_without_header() {
        assert!(magic_bytes_match("application/pdf", b"%PDF-1.4 rest"));
        assert!(!magic_bytes_match("application/pdf", b"<html>not a pdf</html>"));
    }
}
