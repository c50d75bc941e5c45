use anyhow::{Context, Result};
use flowtree_server::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from the optional file and environment variables
    let config = ServerConfig::load().context("Failed to load configuration")?;

    // Run the server using the library's run function
    flowtree_server::run(config).await.context("Server error")?;

    Ok(())
}
