//! HTTP ingress: `GET /send_sms`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router as AxumRouter;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::bootstrap::Shutdown;
use crate::peer::{PeerPool, SessionError};
use crate::proto::{SubmitSm, MAX_SHORT_MESSAGE_LEN};
use crate::router::Router;

/// State shared by the ingress handlers.
pub struct IngressState {
    pool: Arc<PeerPool>,
    router: Router,
    peer_wait: std::time::Duration,
}

/// The `/send_sms` HTTP server.
pub struct HttpServer {
    listener: TcpListener,
    state: Arc<IngressState>,
    shutdown: Arc<Shutdown>,
}

impl HttpServer {
    /// Bind the ingress listener.
    pub async fn bind(
        addr: SocketAddr,
        pool: Arc<PeerPool>,
        router: Router,
        peer_wait: std::time::Duration,
        shutdown: Arc<Shutdown>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "http ingress listening");

        Ok(Self {
            listener,
            state: Arc::new(IngressState {
                pool,
                router,
                peer_wait,
            }),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        let app = AxumRouter::new()
            .route("/send_sms", get(send_sms))
            .with_state(self.state);

        let mut shutdown_rx = self.shutdown.subscribe();

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
                info!("http ingress shutting down");
            })
            .await
    }
}

async fn send_sms(
    State(state): State<Arc<IngressState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let missing: Vec<&str> = ["from", "to", "text"]
        .into_iter()
        .filter(|key| params.get(*key).map_or(true, |v| v.is_empty()))
        .collect();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            format!("Error: missing parameters: {}", missing.join(", ")),
        );
    }

    let from = &params["from"];
    let to = &params["to"];
    let text = &params["text"];

    let dcs: u8 = match params.get("dcs").map(String::as_str).unwrap_or("0").parse() {
        Ok(dcs) => dcs,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                "Error: dcs must be an integer".to_string(),
            );
        }
    };

    if text.len() > MAX_SHORT_MESSAGE_LEN {
        return (
            StatusCode::BAD_REQUEST,
            format!("Error: text exceeds {MAX_SHORT_MESSAGE_LEN} octets"),
        );
    }

    if !state.pool.wait_for_any_bound(state.peer_wait).await {
        warn!(to = %to, "no peer bound within wait budget");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No SMPP peer available".to_string(),
        );
    }

    let Some(peer) = state.router.route(to) else {
        warn!(to = %to, "no route to any bound peer");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No SMPP peer available".to_string(),
        );
    };

    let config = peer.config();
    let submit = SubmitSm {
        source_addr_ton: config.source_addr_ton,
        source_addr_npi: config.source_addr_npi,
        source_addr: from.clone(),
        dest_addr_ton: config.dest_addr_ton,
        dest_addr_npi: config.dest_addr_npi,
        dest_addr: to.clone(),
        registered_delivery: 1,
        data_coding: dcs,
        short_message: text.clone().into_bytes(),
        ..Default::default()
    };

    debug!(peer = %peer.id(), from = %from, to = %to, "submitting");

    match peer.submit(submit).await {
        Ok(outcome) if outcome.status.is_ok() => (
            StatusCode::OK,
            format!("OK - message_id={}", outcome.message_id),
        ),
        Ok(outcome) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: SMPP submit_sm failed ({})", outcome.status.code()),
        ),
        Err(SessionError::Timeout) => (
            StatusCode::GATEWAY_TIMEOUT,
            "Error: SMPP submit_sm timed out".to_string(),
        ),
        Err(e) => {
            warn!(peer = %peer.id(), error = %e, "submit failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "No SMPP peer available".to_string(),
            )
        }
    }
}
