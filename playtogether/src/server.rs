use anyhow::Context;
use playtogether_api::{http::create_router, impls};
use playtogether_core::service::InputBindings;
use playtogether_core::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Relay server: the session driver plus the HTTP/WebSocket listener
pub struct PlayTogetherServer {
    config: Arc<Config>,
}

impl PlayTogetherServer {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Start everything and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bindings = Arc::new(InputBindings::new());
        let (session, driver_handle) = impls::spawn(&self.config, bindings, shutdown_rx.clone());

        let router = create_router(self.config.clone(), session);
        let http_handle = self.start_http_server(router, shutdown_rx).await?;

        info!("All components started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);
        if let Err(e) = driver_handle.await {
            error!("Session driver task failed: {}", e);
        }

        info!("PlayTogether relay stopped");
        Ok(())
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(
        &self,
        router: axum::Router,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_address}"))?;

        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
