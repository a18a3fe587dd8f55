//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::backend::{Backend, EndpointTable};
use crate::config::Config;
use crate::{Error, Result};

/// Routing-and-streaming gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Tool dispatcher
    backend: Arc<Backend>,
}

impl Gateway {
    /// Create a new gateway
    #[must_use]
    pub fn new(config: Config) -> Self {
        let endpoints = EndpointTable::from_config(&config.tools);
        for (tool, endpoint) in &config.tools {
            info!(tool = %tool, url = %endpoint.url, timeout = ?endpoint.timeout, "Mapped tool");
        }
        if endpoints.is_empty() {
            warn!("No tools mapped; every routed message will fail");
        }

        Self {
            config,
            backend: Arc::new(Backend::http(endpoints)),
        }
    }

    /// Run the gateway until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the listener cannot bind.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            backend: Arc::clone(&self.backend),
            keep_alive: self.config.server.keep_alive_interval,
        });
        let app = create_router(state, self.config.server.max_body_size);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("SCHOLAR GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            "  POST http://{}:{}/process_message  (SSE stream)",
            self.config.server.host, self.config.server.port
        );
        info!(
            "  GET  http://{}:{}/health",
            self.config.server.host, self.config.server.port
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Resolve when Ctrl+C or SIGTERM is received
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
