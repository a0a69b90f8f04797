use std::sync::Arc;

use mock_server::Directory;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");

    let mut directory = Directory::sample();
    if let Ok(token) = std::env::var("CONDUIT_TOKEN") {
        directory = directory.require_token(token);
    }

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "conduit mock listening");
    mock_server::run(listener, Arc::new(RwLock::new(directory))).await
}
