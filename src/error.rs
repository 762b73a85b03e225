use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirageError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("validation rejected (code {code}): {message}")]
    Validation {
        code: i64,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("auth failed (code {code}): {message}")]
    AuthFailed { code: i64, message: String },

    #[error("payment required (code {code}): {message}")]
    PaymentRequired { code: i64, message: String },

    #[error("rate limited (code {code}): {message}")]
    RateLimited { code: i64, message: String },

    #[error("upstream error (HTTP {status}, code {code}): {message}")]
    Upstream {
        status: u16,
        code: i64,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("cancelled after {0}ms")]
    Cancelled(u64),

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("missing field in provider payload: {0}")]
    MissingField(&'static str),

    #[error("poll budget exceeded after {attempts} attempts ({elapsed_ms}ms)")]
    PollBudgetExceeded { attempts: u32, elapsed_ms: u64 },

    #[error("task store write failed: {0}")]
    StoreWrite(String),
}

impl MirageError {
    /// Returns true for transient errors the transport retries.
    /// Only HTTP 429 and 500 qualify among status errors; validation,
    /// auth and payment failures are terminal on first sight.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status == 500,
            Self::Request(_) => true, // connection errors may be transient
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Stable snake_case code written to a FAILED task row when this error
    /// forces a terminal transition. Kept coarse so dashboards can group on it.
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "config_error",
            Self::Validation { .. } => "validation_error",
            Self::AuthFailed { .. } => "auth_error",
            Self::PaymentRequired { .. } => "payment_required",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "provider_error",
            Self::Request(_) | Self::Timeout(_) => "network_error",
            Self::Cancelled(_) => "cancelled",
            Self::SchemaParse(_) | Self::MissingField(_) => "malformed_payload",
            Self::PollBudgetExceeded { .. } => "poll_timeout",
            Self::StoreWrite(_) => "store_error",
        }
    }

    /// Provider error code carried by status errors, if any.
    pub fn provider_code(&self) -> Option<i64> {
        match self {
            Self::Validation { code, .. }
            | Self::AuthFailed { code, .. }
            | Self::PaymentRequired { code, .. }
            | Self::RateLimited { code, .. }
            | Self::Upstream { code, .. } => Some(*code),
            _ => None,
        }
    }
}
