use hemmer_provider_mailosaur::{init_logging, serve, MailosaurProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Mailosaur provider");
    serve(MailosaurProvider::new()).await
}
