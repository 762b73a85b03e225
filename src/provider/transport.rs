use std::fmt;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::MirageError;

/// Max provider response body size (2MB).
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 10_000;

/// Per-call knobs for [`Transport::send`].
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Delay applied before retry number `retry` (1-based):
/// `min(1000ms * 2^(retry-1), 10s)`.
pub fn backoff_delay(retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(16);
    Duration::from_millis((BACKOFF_BASE_MS << exp).min(BACKOFF_CAP_MS))
}

/// Provider error envelope: `{code, msg, details?}`.
#[derive(Default, Deserialize)]
struct ErrorEnvelope {
    code: Option<i64>,
    msg: Option<String>,
    details: Option<Value>,
}

/// Authenticated JSON request/response primitive. Knows the provider's
/// envelope and retry policy, nothing about any specific model.
pub struct Transport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Transport {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Send one request with retries. For GET, `body` entries become URL
    /// query parameters; otherwise `body` is the JSON payload.
    ///
    /// Retried: HTTP 429, HTTP 500, network failures, per-attempt timeout.
    /// Everything else is returned on first observation. On exhausted
    /// retries the last observed error is returned unchanged.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        opts: &SendOptions,
    ) -> Result<Value, MirageError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.attempt(&method, &url, body, opts.timeout).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt > opts.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        path = path,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "provider request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, MirageError> {
        let start = Instant::now();

        let mut req = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.api_key);

        if let Some(body) = body {
            if *method == Method::GET {
                req = req.query(&query_pairs(body));
            } else {
                req = req.json(body);
            }
        }

        // One budget covers the whole attempt: send + body read.
        let outcome = tokio::time::timeout(timeout, async {
            let response = req.send().await.map_err(MirageError::Request)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(MirageError::Request)?;
            Ok::<_, MirageError>((status, bytes))
        })
        .await
        .map_err(|_| MirageError::Timeout(start.elapsed().as_millis() as u64))?;

        let (status, bytes) = outcome?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(MirageError::SchemaParse(format!(
                "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                bytes.len()
            )));
        }

        if !status.is_success() {
            return Err(classify_status(status, &bytes));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| MirageError::SchemaParse(format!("provider response: {e}")))
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Map a non-2xx status plus the parsed error envelope onto the error
/// taxonomy. The envelope may be absent or malformed on proxy-level
/// failures; the HTTP status alone still classifies.
fn classify_status(status: StatusCode, body: &[u8]) -> MirageError {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    let code = envelope.code.unwrap_or_else(|| i64::from(status.as_u16()));
    let message = envelope.msg.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });

    match status.as_u16() {
        401 => MirageError::AuthFailed { code, message },
        402 => MirageError::PaymentRequired { code, message },
        422 => MirageError::Validation {
            code,
            message,
            details: envelope.details,
        },
        429 => MirageError::RateLimited { code, message },
        s => MirageError::Upstream {
            status: s,
            code,
            message,
            details: envelope.details,
        },
    }
}

fn query_pairs(body: &Value) -> Vec<(String, String)> {
    body.as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}
