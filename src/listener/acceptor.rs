//! TCP acceptor for incoming ESME connections.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use crate::bootstrap::{Shutdown, ShutdownState};
use crate::config::{AuthCredential, ServerConfig};
use crate::http::SmscClient;

use super::connection::{Connection, ConnectionId};
use super::session::EsmeSession;

/// Listener for incoming SMPP connections.
pub struct SmppListener {
    listener: TcpListener,
    credentials: Arc<Vec<AuthCredential>>,
    egress: SmscClient,
    connection_limit: Arc<Semaphore>,
    next_connection_id: AtomicU64,
    shutdown: Arc<Shutdown>,
}

impl SmppListener {
    /// Bind the server socket.
    pub async fn bind(
        config: &ServerConfig,
        egress: SmscClient,
        shutdown: Arc<Shutdown>,
    ) -> io::Result<Self> {
        let addr = format!("{}:{}", config.bind_ip, config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!(
            address = %listener.local_addr()?,
            max_connections = config.max_connections,
            credentials = config.auth.len(),
            "smpp server listening"
        );

        Ok(Self {
            listener,
            credentials: Arc::new(config.auth.clone()),
            egress,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            next_connection_id: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown.
    pub async fn run(self) -> io::Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() == ShutdownState::Stopping {
                        info!("smpp server shutting down");
                        break;
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.handle_accept(stream, peer_addr),
                        Err(e) => warn!(error = %e, "accept error"),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer = %peer_addr, "connection limit reached, rejecting");
                return;
            }
        };

        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        let connection = Connection::new(id, peer_addr, permit);

        let span = tracing::info_span!("esme", id = %id, peer = %peer_addr);
        debug!(parent: &span, "connection accepted");

        let session = EsmeSession::new(
            connection,
            self.credentials.clone(),
            self.egress.clone(),
            self.shutdown.subscribe(),
        );

        tokio::spawn(
            async move {
                match session.run(stream).await {
                    Ok(()) => debug!("session ended"),
                    Err(e) => debug!(error = %e, "session ended with error"),
                }
            }
            .instrument(span),
        );
    }
}
