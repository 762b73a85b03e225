use std::env;
use std::fmt;

use crate::error::MirageError;

/// Default provider API origin. Override with `KIE_BASE_URL` for staging
/// or a local mock.
pub const DEFAULT_BASE_URL: &str = "https://api.kie.ai";

const API_KEY_VAR: &str = "KIE_API_KEY";
const BASE_URL_VAR: &str = "KIE_BASE_URL";

/// Process configuration for the provider integration.
/// The credential is load-bearing: construction fails without it, so no
/// component downstream ever handles an unauthenticated client.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, MirageError> {
        let api_key = env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(MirageError::MissingCredential(API_KEY_VAR))?;

        let base_url =
            env::var(BASE_URL_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::new(api_key, base_url))
    }

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}
