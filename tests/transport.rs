//! Transport client tests: retry/backoff policy, status classification,
//! envelope extraction, and auth header placement, against hand-rolled
//! mock HTTP servers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mirage::config::Config;
use mirage::error::MirageError;
use mirage::provider::transport::{SendOptions, Transport, backoff_delay};

/// Helper: bind a TCP listener on localhost and return (listener, port).
async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn http_response(status_line: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve the same response to every connection, counting hits.
fn serve_fixed(listener: TcpListener, status_line: &'static str, body: &'static str) -> Arc<AtomicU32> {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let response = http_response(status_line, body);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    hits
}

/// Serve a scripted sequence of responses; the last one repeats.
fn serve_sequence(listener: TcpListener, responses: Vec<(&'static str, &'static str)>) -> Arc<AtomicU32> {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let hit = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let (status_line, body) = responses[hit.min(responses.len() - 1)];
            let response = http_response(status_line, body);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    hits
}

fn transport_for(port: u16) -> Transport {
    Transport::new(&Config::new("sk-test", format!("http://127.0.0.1:{port}")))
}

// ---------------------------------------------------------------------------
// Retry exhaustion and backoff schedule
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_exhaustion_on_500_makes_max_retries_plus_one_attempts() {
    let (listener, port) = mock_listener().await;
    let hits = serve_fixed(listener, "500 Internal Server Error", r#"{"code":500,"msg":"internal error"}"#);

    let transport = transport_for(port);
    let opts = SendOptions {
        max_retries: 2,
        timeout: Duration::from_secs(5),
    };

    let start = Instant::now();
    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &opts)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(hits.load(Ordering::SeqCst), 3, "expected max_retries+1 attempts");
    match err {
        MirageError::Upstream { status, code, message, .. } => {
            assert_eq!(status, 500);
            assert_eq!(code, 500);
            assert_eq!(message, "internal error");
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
    // Backoff before the two retries: 1000ms + 2000ms.
    assert!(
        elapsed >= Duration::from_millis(3000),
        "expected >= 3s of backoff, got {elapsed:?}"
    );
}

#[test]
fn backoff_schedule_is_exponential_and_capped() {
    assert_eq!(backoff_delay(1), Duration::from_millis(1000));
    assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    assert_eq!(backoff_delay(3), Duration::from_millis(4000));
    assert_eq!(backoff_delay(4), Duration::from_millis(8000));
    assert_eq!(backoff_delay(5), Duration::from_millis(10000)); // capped
    assert_eq!(backoff_delay(60), Duration::from_millis(10000)); // no overflow
}

#[tokio::test]
async fn rate_limit_is_retried_until_success() {
    let (listener, port) = mock_listener().await;
    let hits = serve_sequence(
        listener,
        vec![
            ("429 Too Many Requests", r#"{"code":429,"msg":"rate limited"}"#),
            ("200 OK", r#"{"code":200,"msg":"success","data":{"taskId":"ext-1"}}"#),
        ],
    );

    let transport = transport_for(port);
    let opts = SendOptions {
        max_retries: 3,
        timeout: Duration::from_secs(5),
    };

    let start = Instant::now();
    let envelope = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &opts)
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(envelope["data"]["taskId"], "ext-1");
    assert!(start.elapsed() >= Duration::from_millis(1000), "one backoff expected");
}

// ---------------------------------------------------------------------------
// Non-retryable short-circuit: 401 / 402 / 422 observed exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_failure_short_circuits_after_one_attempt() {
    let (listener, port) = mock_listener().await;
    let hits = serve_fixed(listener, "401 Unauthorized", r#"{"code":401,"msg":"invalid api key"}"#);

    let transport = transport_for(port);
    let start = Instant::now();
    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &SendOptions::default())
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_millis(900), "no backoff expected");
    match err {
        MirageError::AuthFailed { code, message } => {
            assert_eq!(code, 401);
            assert_eq!(message, "invalid api key");
        }
        other => panic!("expected AuthFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn payment_failure_short_circuits_after_one_attempt() {
    let (listener, port) = mock_listener().await;
    let hits = serve_fixed(listener, "402 Payment Required", r#"{"code":402,"msg":"insufficient credits"}"#);

    let transport = transport_for(port);
    let err = transport
        .send(Method::POST, "/api/v1/runway/generate", Some(&json!({"prompt": "x"})), &SendOptions::default())
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(matches!(err, MirageError::PaymentRequired { code: 402, .. }));
}

#[tokio::test]
async fn validation_failure_carries_envelope_details() {
    let (listener, port) = mock_listener().await;
    let hits = serve_fixed(
        listener,
        "422 Unprocessable Entity",
        r#"{"code":422,"msg":"prompt is required","details":{"field":"prompt"}}"#,
    );

    let transport = transport_for(port);
    let err = transport
        .send(Method::POST, "/api/v1/gpt4o-image/generate", Some(&json!({})), &SendOptions::default())
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    match err {
        MirageError::Validation { code, message, details } => {
            assert_eq!(code, 422);
            assert_eq!(message, "prompt is required");
            assert_eq!(details.unwrap()["field"], "prompt");
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[tokio::test]
async fn other_4xx_is_terminal_upstream_error() {
    let (listener, port) = mock_listener().await;
    let hits = serve_fixed(listener, "404 Not Found", r#"{"code":404,"msg":"not found"}"#);

    let transport = transport_for(port);
    let err = transport
        .send(Method::GET, "/api/v1/veo/record-info", Some(&json!({"taskId": "x"})), &SendOptions::default())
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(matches!(err, MirageError::Upstream { status: 404, .. }));
}

#[tokio::test]
async fn error_envelope_may_be_absent() {
    // Proxy-level failures send non-JSON bodies; classification still works.
    let (listener, port) = mock_listener().await;
    serve_fixed(listener, "422 Unprocessable Entity", "plain text failure");

    let transport = transport_for(port);
    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &SendOptions::default())
        .await
        .unwrap_err();

    match err {
        MirageError::Validation { code, message, .. } => {
            assert_eq!(code, 422);
            assert_eq!(message, "Unprocessable Entity");
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Network failures and per-attempt timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_refused_is_retried_then_surfaced() {
    // Bind then drop to reserve a dead port.
    let (listener, port) = mock_listener().await;
    drop(listener);

    let transport = transport_for(port);
    let opts = SendOptions {
        max_retries: 1,
        timeout: Duration::from_secs(2),
    };

    let start = Instant::now();
    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &opts)
        .await
        .unwrap_err();

    assert!(matches!(err, MirageError::Request(_)));
    assert!(
        start.elapsed() >= Duration::from_millis(1000),
        "one backoff expected before the retry"
    );
}

#[tokio::test]
async fn per_attempt_timeout_counts_as_retryable_failure() {
    let (listener, port) = mock_listener().await;
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();

    // Accept and read, then stall without responding.
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let transport = transport_for(port);
    let opts = SendOptions {
        max_retries: 1,
        timeout: Duration::from_millis(300),
    };

    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &opts)
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 2, "timeout must be retried");
    assert!(matches!(err, MirageError::Timeout(_)));
}

// ---------------------------------------------------------------------------
// Request shape: auth header, GET query parameters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requests_carry_bearer_auth_and_get_uses_query_params() {
    let (listener, port) = mock_listener().await;
    let (head_tx, mut head_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let head_tx = head_tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let _ = head_tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
                let body = r#"{"code":200,"msg":"success","data":{"state":"waiting"}}"#;
                let _ = socket
                    .write_all(http_response("200 OK", body).as_bytes())
                    .await;
            });
        }
    });

    let transport = transport_for(port);
    transport
        .send(
            Method::GET,
            "/api/v1/flux/kontext/record-info",
            Some(&json!({"taskId": "ext-42"})),
            &SendOptions::default(),
        )
        .await
        .unwrap();

    let head = head_rx.recv().await.unwrap();
    let lowered = head.to_lowercase();
    assert!(
        head.starts_with("GET /api/v1/flux/kontext/record-info?taskId=ext-42"),
        "unexpected request line: {head}"
    );
    assert!(
        lowered.contains("authorization: bearer sk-test"),
        "missing bearer header: {head}"
    );
}

#[tokio::test]
async fn success_body_must_be_json() {
    let (listener, port) = mock_listener().await;
    serve_fixed(listener, "200 OK", "<html>gateway</html>");

    let transport = transport_for(port);
    let err = transport
        .send(Method::POST, "/api/v1/veo/generate", Some(&json!({"prompt": "x"})), &SendOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MirageError::SchemaParse(_)));
}

// ---------------------------------------------------------------------------
// Credential handling
// ---------------------------------------------------------------------------

#[test]
fn transport_debug_redacts_credential() {
    let transport = Transport::new(&Config::new("sk-super-secret", "http://127.0.0.1:1"));
    let debug = format!("{transport:?}");
    assert!(debug.contains("[REDACTED]"));
    assert!(!debug.contains("sk-super-secret"));
}

#[test]
fn default_send_options() {
    let opts = SendOptions::default();
    assert_eq!(opts.max_retries, 3);
    assert_eq!(opts.timeout, Duration::from_secs(30));
}
