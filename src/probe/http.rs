//! HTTP probe implementation.

use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};

use reqwest::header;

use super::{ProbeError, ProbeOutcome};

/// User agent sent with every probe.
pub const USER_AGENT: &str = "Website-Monitor/1.0";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Issues bounded-time GET requests and classifies the result.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, timeout })
    }

    /// Probe `url` once.
    ///
    /// Exceeding the deadline drops the in-flight request. Elapsed time is
    /// measured until the outcome is known, on every path.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT_HTML)
            .send();

        let result = tokio::time::timeout(self.timeout, request).await;
        let elapsed_ms = elapsed_millis(start);

        match result {
            Ok(Ok(response)) => ProbeOutcome::from_status(response.status().as_u16(), elapsed_ms),
            Ok(Err(e)) if e.is_timeout() => {
                ProbeOutcome::failed(timeout_message(self.timeout), elapsed_ms)
            }
            Ok(Err(e)) => {
                tracing::debug!("Probe of {} failed: {:?}", url, e);
                ProbeOutcome::failed(classify_transport_error(&e), elapsed_ms)
            }
            Err(_) => ProbeOutcome::failed(timeout_message(self.timeout), elapsed_ms),
        }
    }
}

fn elapsed_millis(start: Instant) -> u64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() as u64
}

/// "Request timeout (10s)", "Request timeout (2.5s)".
pub fn timeout_message(timeout: Duration) -> String {
    format!("Request timeout ({}s)", timeout.as_millis() as f64 / 1000.0)
}

fn classify_transport_error(err: &reqwest::Error) -> String {
    if let Some(kind) = classify_error_chain(err) {
        return kind.to_string();
    }

    if err.is_connect() || err.is_request() || err.is_body() {
        return "Network error".to_string();
    }

    err.to_string()
}

/// Walk the source chain looking for refused connections or resolver failures.
fn classify_error_chain(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return Some("Connection refused");
            }
        }

        let msg = e.to_string().to_ascii_lowercase();
        if msg.contains("connection refused") {
            return Some("Connection refused");
        }
        if msg.contains("dns error")
            || msg.contains("failed to lookup address")
            || msg.contains("name or service not known")
            || msg.contains("no such host")
        {
            return Some("DNS resolution failed");
        }

        current = e.source();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeState;
    use crate::test_support::serve_stub;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::Redirect,
        routing::get,
        Router,
    };
    use std::fmt;

    fn stub_router() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/moved", get(|| async { Redirect::temporary("/ok") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route(
                "/headers",
                get(|headers: HeaderMap| async move {
                    let ua = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
                    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
                    if ua == Some(USER_AGENT) && accept == Some(ACCEPT_HTML) {
                        StatusCode::OK
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            )
    }

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("tcp connect error")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(timeout_message(Duration::from_millis(10_000)), "Request timeout (10s)");
        assert_eq!(timeout_message(Duration::from_millis(2500)), "Request timeout (2.5s)");
    }

    #[test]
    fn test_classify_error_chain() {
        let refused = Wrapped(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"));
        assert_eq!(classify_error_chain(&refused), Some("Connection refused"));

        let dns = Wrapped(io::Error::new(
            io::ErrorKind::Other,
            "failed to lookup address information: Name or service not known",
        ));
        assert_eq!(classify_error_chain(&dns), Some("DNS resolution failed"));

        let reset = Wrapped(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(classify_error_chain(&reset), None);
    }

    #[tokio::test]
    async fn test_probe_classifies_status_codes() {
        let addr = serve_stub(stub_router()).await;
        let prober = Prober::new(Duration::from_secs(5)).unwrap();

        let up = prober.probe(&format!("http://{}/ok", addr)).await;
        assert_eq!(up.state, ProbeState::Up);
        assert_eq!(up.status_code, Some(200));
        assert_eq!(up.error, None);

        let missing = prober.probe(&format!("http://{}/missing", addr)).await;
        assert_eq!(missing.state, ProbeState::Down);
        assert_eq!(missing.status_code, Some(404));
        assert_eq!(missing.error.as_deref(), Some("HTTP 404"));

        let broken = prober.probe(&format!("http://{}/broken", addr)).await;
        assert_eq!(broken.error.as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn test_probe_follows_redirects() {
        let addr = serve_stub(stub_router()).await;
        let prober = Prober::new(Duration::from_secs(5)).unwrap();

        let outcome = prober.probe(&format!("http://{}/moved", addr)).await;
        assert_eq!(outcome.state, ProbeState::Up);
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_probe_sends_identifying_headers() {
        let addr = serve_stub(stub_router()).await;
        let prober = Prober::new(Duration::from_secs(5)).unwrap();

        let outcome = prober.probe(&format!("http://{}/headers", addr)).await;
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_probe_is_deterministic_for_same_status() {
        let addr = serve_stub(stub_router()).await;
        let prober = Prober::new(Duration::from_secs(5)).unwrap();
        let url = format!("http://{}/missing", addr);

        let first = prober.probe(&url).await;
        let second = prober.probe(&url).await;
        assert_eq!(first.state, second.state);
        assert_eq!(first.error, second.error);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let addr = serve_stub(stub_router()).await;
        let prober = Prober::new(Duration::from_millis(200)).unwrap();

        let outcome = prober.probe(&format!("http://{}/slow", addr)).await;
        assert_eq!(outcome.state, ProbeState::Down);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error.as_deref(), Some("Request timeout (0.2s)"));
        assert!(outcome.elapsed_ms >= 190, "elapsed {}", outcome.elapsed_ms);
        assert!(outcome.elapsed_ms < 5000, "elapsed {}", outcome.elapsed_ms);
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = Prober::new(Duration::from_secs(2)).unwrap();
        let outcome = prober.probe(&format!("http://{}/", addr)).await;
        assert_eq!(outcome.state, ProbeState::Down);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error.as_deref(), Some("Connection refused"));
    }

    #[tokio::test]
    async fn test_probe_invalid_url_is_down() {
        let prober = Prober::new(Duration::from_secs(1)).unwrap();
        let outcome = prober.probe("not a url").await;
        assert_eq!(outcome.state, ProbeState::Down);
        assert!(outcome.error.is_some());
    }
}
