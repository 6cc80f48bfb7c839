//! Resource types managed by the provider.

pub mod server;

pub use server::{ServerResource, ServerState};
