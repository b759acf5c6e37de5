use anyhow::Result;
use tracing_subscriber::EnvFilter;

use icon_search::server::IconSearchServer;
use icon_search::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is used for MCP communication)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tracing::debug!("Configuration: {:?}", config);

    let server = IconSearchServer::new(config).await?;
    server.run().await?;

    Ok(())
}
