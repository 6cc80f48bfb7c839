//! Minimal async client for the Mailosaur servers API.
//!
//! Only the six calls the `mailosaur_server` resource needs are covered. The
//! [`ServersApi`] trait is the seam the resource handler talks to, so tests can
//! swap in an in-memory implementation.

mod models;

pub use models::{Server, ServerCreateOptions};

use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, instrument};

use models::PasswordResponse;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://mailosaur.com/";

/// Default SMTP host used to build server email addresses.
pub const DEFAULT_SMTP_HOST: &str = "mailosaur.net";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const EMAIL_LOCAL_PART_LEN: usize = 10;

/// Errors returned by the Mailosaur client.
#[derive(Debug, Error)]
pub enum MailosaurError {
    /// The request could not be sent or the response could not be decoded.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Mailosaur API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, or the canonical status reason when empty.
        message: String,
    },

    /// The addressed object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The configured base URL cannot address API paths.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Operations on Mailosaur virtual servers.
#[async_trait]
pub trait ServersApi: Send + Sync {
    /// Create a server.
    async fn create(&self, options: &ServerCreateOptions) -> Result<Server, MailosaurError>;

    /// Fetch a server by id.
    async fn get(&self, id: &str) -> Result<Server, MailosaurError>;

    /// Replace a server's mutable fields.
    async fn update(&self, id: &str, server: &Server) -> Result<Server, MailosaurError>;

    /// Delete a server.
    async fn delete(&self, id: &str) -> Result<(), MailosaurError>;

    /// Fetch the SMTP/POP3 password of a server.
    async fn get_password(&self, id: &str) -> Result<String, MailosaurError>;

    /// Generate a fresh email address that delivers to the server.
    async fn generate_email_address(&self, id: &str) -> Result<String, MailosaurError>;
}

/// Builder for [`MailosaurClient`].
#[derive(Debug, Clone)]
pub struct MailosaurClientBuilder {
    api_key: String,
    base_url: String,
    smtp_host: String,
    timeout: Duration,
}

impl MailosaurClientBuilder {
    /// Override the API endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the SMTP host used for generated addresses.
    pub fn smtp_host(mut self, smtp_host: impl Into<String>) -> Self {
        self.smtp_host = smtp_host.into();
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<MailosaurClient, MailosaurError> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| MailosaurError::InvalidBaseUrl(format!("{}: {}", self.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(MailosaurError::InvalidBaseUrl(self.base_url));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(self.timeout)
            .build()?;

        Ok(MailosaurClient {
            http,
            base_url,
            api_key: self.api_key,
            smtp_host: self.smtp_host,
        })
    }
}

/// HTTP implementation of [`ServersApi`].
///
/// Authenticates with HTTP basic auth, the API key as username and an empty
/// password.
#[derive(Clone)]
pub struct MailosaurClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    smtp_host: String,
}

impl std::fmt::Debug for MailosaurClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailosaurClient")
            .field("base_url", &self.base_url.as_str())
            .field("smtp_host", &self.smtp_host)
            .finish_non_exhaustive()
    }
}

impl MailosaurClient {
    /// Start building a client for the given API key.
    pub fn builder(api_key: impl Into<String>) -> MailosaurClientBuilder {
        MailosaurClientBuilder {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with default endpoints.
    pub fn new(api_key: impl Into<String>) -> Result<Self, MailosaurError> {
        Self::builder(api_key).build()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MailosaurError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MailosaurError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.api_key, Some(""))
    }
}

/// Turn non-success responses into errors.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, MailosaurError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), %path, "Mailosaur API request failed");

    if status == StatusCode::NOT_FOUND {
        return Err(MailosaurError::NotFound(path));
    }

    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.trim().to_string()
    };
    Err(MailosaurError::Api {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn random_local_part() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(EMAIL_LOCAL_PART_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[async_trait]
impl ServersApi for MailosaurClient {
    #[instrument(skip(self, options), fields(name = %options.name))]
    async fn create(&self, options: &ServerCreateOptions) -> Result<Server, MailosaurError> {
        let url = self.endpoint(&["api", "servers"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(options)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Server, MailosaurError> {
        let url = self.endpoint(&["api", "servers", id])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self, server))]
    async fn update(&self, id: &str, server: &Server) -> Result<Server, MailosaurError> {
        let url = self.endpoint(&["api", "servers", id])?;
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(server)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), MailosaurError> {
        let url = self.endpoint(&["api", "servers", id])?;
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_password(&self, id: &str) -> Result<String, MailosaurError> {
        let url = self.endpoint(&["api", "servers", id, "password"])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let password: PasswordResponse = check(response).await?.json().await?;
        Ok(password.value)
    }

    async fn generate_email_address(&self, id: &str) -> Result<String, MailosaurError> {
        Ok(format!(
            "{}@{}.{}",
            random_local_part(),
            id,
            self.smtp_host
        ))
    }
}
