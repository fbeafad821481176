use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::transport::{Connection, ConnectionProcessor, TcpSocket};

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))
}

/// Accepts connections forever, giving each one a fresh processor.
pub async fn serve<P, F>(listener: TcpListener, cfg: &Config, factory: F) -> anyhow::Result<()>
where
    P: ConnectionProcessor,
    F: Fn() -> P,
{
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let conn = Connection::open(TcpSocket::new(socket), factory(), cfg.connection.clone());
        tokio::spawn(async move {
            conn.closed().await;
            tracing::debug!(peer = %peer, "connection released");
        });
    }
}

pub async fn run<P, F>(cfg: &Config, factory: F) -> anyhow::Result<()>
where
    P: ConnectionProcessor,
    F: Fn() -> P,
{
    let listener = bind(&cfg.listen_addr).await?;
    serve(listener, cfg, factory).await
}
