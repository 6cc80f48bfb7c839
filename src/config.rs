//! Provider configuration.
//!
//! The host sends the provider block as JSON. Anything it leaves out falls back
//! to environment variables, read through an injectable lookup so tests never
//! touch the process environment.

use serde::Deserialize;
use serde_json::Value;

use crate::client::{DEFAULT_BASE_URL, DEFAULT_SMTP_HOST};
use crate::error::ProviderError;

/// Environment fallback for the `api_key` attribute.
pub const API_KEY_ENV: &str = "MAILOSAUR_API_KEY";

/// Environment override for the API endpoint.
pub const BASE_URL_ENV: &str = "MAILOSAUR_BASE_URL";

/// Environment override for the SMTP host in generated addresses.
pub const SMTP_HOST_ENV: &str = "MAILOSAUR_SMTP_HOST";

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    api_key: Option<String>,
}

/// Resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Mailosaur API key.
    pub api_key: String,
    /// API endpoint.
    pub base_url: String,
    /// SMTP host used to build server email addresses.
    pub smtp_host: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("smtp_host", &self.smtp_host)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve configuration from the provider block and an environment lookup.
    ///
    /// An explicit `api_key` wins over the environment. A key that is empty
    /// after the fallback is a configuration error.
    pub fn resolve<F>(config: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = match config {
            Value::Null => RawConfig::default(),
            other => serde_json::from_value(other.clone())?,
        };

        let api_key = raw
            .api_key
            .or_else(|| env(API_KEY_ENV))
            .unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Configuration(format!(
                "Unable to find {}: API key cannot be an empty string",
                API_KEY_ENV
            )));
        }

        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_key,
            base_url: non_empty(BASE_URL_ENV).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            smtp_host: non_empty(SMTP_HOST_ENV).unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        })
    }
}
