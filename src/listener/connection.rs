//! Connection state for accepted ESME sessions.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock};
use tracing::debug;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection established, awaiting bind
    Unbound,
    BoundTx,
    BoundRx,
    BoundTrx,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unbound => write!(f, "UNBOUND"),
            ConnectionState::BoundTx => write!(f, "BOUND_TX"),
            ConnectionState::BoundRx => write!(f, "BOUND_RX"),
            ConnectionState::BoundTrx => write!(f, "BOUND_TRX"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

impl ConnectionState {
    /// States that may carry submit_sm.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::BoundTx | Self::BoundTrx)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Self::BoundTx | Self::BoundRx | Self::BoundTrx)
    }
}

/// One accepted ESME connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: RwLock<ConnectionState>,
    /// Auth identity; set only after a successful bind
    system_id: RwLock<Option<String>>,
    /// Released on drop, freeing a listener slot
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, permit: OwnedSemaphorePermit) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer_addr,
            state: RwLock::new(ConnectionState::Unbound),
            system_id: RwLock::new(None),
            _permit: permit,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnectionState) {
        let from = self.state().await;
        debug!(id = %self.id, from = %from, to = %state, "state transition");
        *self.state.write().await = state;
    }

    pub async fn system_id(&self) -> Option<String> {
        self.system_id.read().await.clone()
    }

    pub async fn set_system_id(&self, system_id: String) {
        *self.system_id.write().await = Some(system_id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
