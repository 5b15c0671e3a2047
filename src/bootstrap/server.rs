use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::http::{HttpServer, SmscClient};
use crate::listener::SmppListener;
use crate::peer::PeerPool;
use crate::router::Router;

use super::shutdown::Shutdown;

const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The assembled bridge: peer pool, SMPP server and HTTP ingress.
pub struct Bridge {
    shutdown: Arc<Shutdown>,
    pool: Arc<PeerPool>,
    http_addr: SocketAddr,
    smpp_addr: SocketAddr,
    http_task: JoinHandle<()>,
    smpp_task: JoinHandle<()>,
}

impl Bridge {
    /// Bind all sockets and spawn every task.
    pub async fn start(config: Config) -> Result<Self> {
        let shutdown = Shutdown::new();

        let egress = SmscClient::new(config.http_server.kamailio_url.clone())
            .context("failed to build smsc egress client")?;

        let pool = Arc::new(PeerPool::start(&config.smpp_peers, egress.clone(), &shutdown));
        for peer in pool.iter() {
            info!(
                peer = %peer.id(),
                address = %peer.config().address(),
                route_regex = peer.config().route_regex.as_deref().unwrap_or("-"),
                default = peer.config().is_default,
                "peer configured"
            );
        }

        let router = Router::new(&pool);

        let smpp_listener =
            SmppListener::bind(&config.smpp_server, egress.clone(), shutdown.clone())
                .await
                .context("failed to bind smpp server")?;
        let smpp_addr = smpp_listener.local_addr()?;
        let smpp_task = tokio::spawn(async move {
            if let Err(e) = smpp_listener.run().await {
                error!(error = %e, "smpp server failed");
            }
        });

        let http_bind: SocketAddr =
            format!("{}:{}", config.http_server.bind_ip, config.http_server.port)
                .parse()
                .context("invalid http_server bind address")?;
        let http_server = HttpServer::bind(
            http_bind,
            pool.clone(),
            router,
            config.http_server.peer_wait(),
            shutdown.clone(),
        )
        .await
        .context("failed to bind http ingress")?;
        let http_addr = http_server.local_addr()?;
        let http_task = tokio::spawn(async move {
            if let Err(e) = http_server.run().await {
                error!(error = %e, "http ingress failed");
            }
        });

        info!(
            http = %http_addr,
            smpp = %smpp_addr,
            peers = pool.len(),
            smsc = %config.http_server.kamailio_url,
            "bridge started"
        );

        Ok(Self {
            shutdown,
            pool,
            http_addr,
            smpp_addr,
            http_task,
            smpp_task,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn smpp_addr(&self) -> SocketAddr {
        self.smpp_addr
    }

    pub fn pool(&self) -> &Arc<PeerPool> {
        &self.pool
    }

    /// Run until SIGINT/SIGTERM, then stop.
    pub async fn run(self) -> Result<()> {
        wait_for_signal().await;
        info!("shutdown signal received");
        self.stop().await;
        Ok(())
    }

    /// Trigger shutdown and drain the server tasks.
    pub async fn stop(self) {
        self.shutdown.trigger();

        let drained = tokio::time::timeout(STOP_DRAIN_TIMEOUT, async {
            let _ = self.http_task.await;
            let _ = self.smpp_task.await;
        })
        .await;

        if drained.is_err() {
            error!("drain timeout reached, abandoning server tasks");
        }

        info!("bridge stopped");
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
