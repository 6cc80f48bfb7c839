//! Hemmer provider for Mailosaur
//!
//! Manages Mailosaur virtual servers (the `mailosaur_server` resource) through
//! the Hemmer provider protocol. The host spawns the binary, reads the
//! handshake line from stdout and drives the resource lifecycle over gRPC.
//!
//! # Resource
//!
//! `mailosaur_server` has one user-set attribute, `name`. The API assigns
//! `id`, and the provider fills `password` (sensitive) and `email` once; later
//! plans and reads keep them stable.
//!
//! # Configuration
//!
//! ```hcl
//! provider "mailosaur" {
//!   api_key = "..." # or MAILOSAUR_API_KEY
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it prints a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{MailosaurClient, MailosaurError, ServersApi};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, try_init_logging};
pub use provider::MailosaurProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    ApplyResult, AttributeChange, ImportedResource, PlanResult, ProviderMetadata,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
