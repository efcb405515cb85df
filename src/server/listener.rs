use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::connection::ServerConnection;
use crate::http::handler::Handler;

/// A bound listener serving every accepted connection with one handler.
pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    config: ServerConfig,
}

impl<H: Handler> Server<H> {
    pub async fn bind(config: &ServerConfig, handler: H) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr))?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until an accept error occurs. Each connection
    /// runs on its own task.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            tracing::debug!("Accepted connection from {}", peer);

            if let Err(e) = socket.set_nodelay(true) {
                self.handler.log(&format!("failed to set TCP_NODELAY: {}", e));
            }

            ServerConnection::new(socket, self.handler.clone(), &self.config)
                .with_peer(peer)
                .start();
        }
    }
}

/// Binds `cfg.listen_addr` and serves `handler` until accepting fails.
pub async fn run<H: Handler>(cfg: &ServerConfig, handler: H) -> anyhow::Result<()> {
    Server::bind(cfg, handler).await?.run().await
}
