//! Chunk server loop.
//!
//! Binds the configured address and serves the chunkload routes until
//! [`ChunkServer::shutdown`] is called.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::config::ServerConfig;
use crate::registry::ChunkRegistry;
use crate::routes;

/// The chunkload HTTP server.
pub struct ChunkServer {
    config: ServerConfig,
    registry: Arc<ChunkRegistry>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ChunkServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(ChunkRegistry::new(config.storage_root.clone()));
        Arc::new(Self {
            config,
            registry,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<ChunkRegistry> {
        &self.registry
    }

    /// Returns the address the server is listening on.
    ///
    /// Only available once [`run`](Self::run) or [`serve`](Self::serve)
    /// has a listener.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        tokio::fs::create_dir_all(self.registry.root()).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            root = %self.registry.root().display(),
            "chunk server listening on {local_addr}"
        );

        let app = routes::router(Arc::clone(&self.registry), self.config.max_body_bytes);
        let cancel = self.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("server shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn serves_until_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");
        let server = ChunkServer::new(ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage_root: root.clone(),
            ..Default::default()
        });
        assert_eq!(server.local_addr().await, None);

        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let addr = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(addr) = server.local_addr().await {
                    break addr;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_ne!(addr.port(), 0);
        assert!(root.is_dir());

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
