//! Error types surfaced by the provider.

use thiserror::Error;

use crate::client::MailosaurError;
use crate::schema::Diagnostic;

/// Errors returned from provider operations.
///
/// Every remote failure collapses into [`ProviderError::Client`]; there is no
/// distinction between transient and permanent failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A call to the Mailosaur API failed.
    #[error("Client error: unable to {operation}, got error: {message}")]
    Client {
        /// What the provider was trying to do, e.g. "create server".
        operation: String,
        /// The underlying client error message.
        message: String,
    },

    /// The provider is missing configuration or was never configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The host sent a request the provider cannot act on.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl ProviderError {
    /// Wrap a client failure with the operation that triggered it.
    pub fn client(operation: impl Into<String>, err: MailosaurError) -> Self {
        Self::Client {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Get the error message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Client { message, .. } => message,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::InvalidRequest(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
        }
    }

    /// Render this error as a user-facing error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Client { operation, message } => Diagnostic::error("Client Error")
                .with_detail(format!("Unable to {}, got error: {}", operation, message)),
            Self::Configuration(msg) => Diagnostic::error("Provider Configuration Error")
                .with_detail(msg.clone()),
            Self::UnknownResource(msg) => {
                Diagnostic::error("Unknown Resource Type").with_detail(msg.clone())
            },
            other => Diagnostic::error(other.to_string()),
        }
    }
}
