//! Main Flowtree Server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use flowtree_core::FlowService;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// HTTP front end of one flow service
#[derive(Clone)]
pub struct FlowtreeServer {
    /// Configuration
    pub config: ServerConfig,

    service: FlowService,
}

impl std::fmt::Debug for FlowtreeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowtreeServer")
            .field("config", &self.config)
            .finish()
    }
}

impl FlowtreeServer {
    /// Create a new FlowtreeServer
    pub fn new(config: ServerConfig, service: FlowService) -> Self {
        Self { config, service }
    }

    /// The hierarchy engine behind the routes
    pub fn service(&self) -> &FlowService {
        &self.service
    }

    /// Build the router for this server
    pub fn router(self) -> axum::Router {
        crate::api::build_router(Arc::new(self))
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting Flowtree Server");
        let listener = TcpListener::bind(self.config.socket_addr()?).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until ctrl-c
    pub async fn serve(self, listener: TcpListener) -> ServerResult<()> {
        let addr: SocketAddr = listener.local_addr()?;
        info!("Listening on {}", addr);

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
