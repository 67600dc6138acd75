use std::path::PathBuf;

use chatrelay_common::{Error, Result};
use chatrelay_config::{AppConfig, ConfigLoader};
use tokio::net::TcpListener;
use tracing::info;

use crate::bootstrap::build_state;
use crate::router::build_router;

/// The main gateway server that binds to a port and serves the chat API.
pub struct GatewayServer {
    config: AppConfig,
    store_path: Option<PathBuf>,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store_path: None,
        }
    }

    /// SQLite file to use instead of the config-derived default.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);

        let store_path = self.store_path.unwrap_or_else(|| {
            ConfigLoader::with_dir(ConfigLoader::default_config_dir()).store_path(&self.config)
        });

        let state = build_state(self.config, &store_path)?;
        let app = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("chatrelay gateway listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        info!("chatrelay gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
