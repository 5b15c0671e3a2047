//! Pool of upstream peer sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bootstrap::Shutdown;
use crate::config::PeerConfig;
use crate::http::SmscClient;

use super::session::{self, PeerHandle, PeerState};

/// All configured peer sessions, in config order.
///
/// Built once at startup and shared read-only; the sessions themselves flap
/// behind their handles.
pub struct PeerPool {
    peers: Vec<Arc<PeerHandle>>,
    by_id: HashMap<String, usize>,
}

impl PeerPool {
    /// Spawn one session per configured peer.
    pub fn start(configs: &[PeerConfig], egress: SmscClient, shutdown: &Shutdown) -> Self {
        let mut peers = Vec::with_capacity(configs.len());
        let mut by_id = HashMap::with_capacity(configs.len());

        for config in configs {
            let handle = session::spawn(Arc::new(config.clone()), egress.clone(), shutdown);
            by_id.insert(config.id.clone(), peers.len());
            peers.push(handle);
        }

        info!(peers = peers.len(), "peer pool started");

        Self { peers, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PeerHandle>> {
        self.by_id.get(id).map(|&idx| &self.peers[idx])
    }

    /// Iterate peers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PeerHandle>> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Wait until at least one session is BOUND.
    ///
    /// Returns immediately when one already is; otherwise awaits state
    /// changes and gives up after `timeout`.
    pub async fn wait_for_any_bound(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut watchers: Vec<_> = self.peers.iter().map(|p| p.subscribe()).collect();

        loop {
            if watchers
                .iter()
                .any(|rx| *rx.borrow() == PeerState::Bound)
            {
                return true;
            }

            if watchers.is_empty() {
                // nothing left that could change state
                tokio::time::sleep_until(deadline).await;
                return false;
            }

            let idx_to_remove = {
                let changed = futures::future::select_all(
                    watchers.iter_mut().map(|rx| Box::pin(rx.changed())),
                );

                match tokio::time::timeout_at(deadline, changed).await {
                    Err(_) => return false,
                    Ok((Ok(()), _, _rest)) => None,
                    Ok((Err(_), idx, _rest)) => {
                        // that session task is gone; stop watching it
                        Some(idx)
                    }
                }
            };
            if let Some(idx) = idx_to_remove {
                watchers.remove(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_handle;

    fn peer_config(id: &str) -> PeerConfig {
        let yaml = format!(
            r#"
id: {id}
ipaddress: 127.0.0.1
port: 2775
system_id: test
password: test
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn test_pool(ids: &[&str]) -> (PeerPool, Vec<tokio::sync::watch::Sender<PeerState>>) {
        let mut peers = Vec::new();
        let mut by_id = HashMap::new();
        let mut states = Vec::new();

        for id in ids {
            let (handle, state) = test_handle(peer_config(id));
            by_id.insert(id.to_string(), peers.len());
            peers.push(handle);
            states.push(state);
        }

        (PeerPool { peers, by_id }, states)
    }

    #[tokio::test]
    async fn returns_immediately_when_already_bound() {
        let (pool, states) = test_pool(&["a", "b"]);
        states[1].send(PeerState::Bound).unwrap();

        assert!(pool.wait_for_any_bound(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn times_out_with_no_bound_peer() {
        let (pool, states) = test_pool(&["a"]);
        states[0].send(PeerState::Connecting).unwrap();

        assert!(!pool.wait_for_any_bound(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn wakes_when_a_peer_binds_later() {
        let (pool, states) = test_pool(&["a"]);
        let state = states.into_iter().next().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = state.send(PeerState::Bound);
        });

        assert!(pool.wait_for_any_bound(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn lookup_by_id_and_order() {
        let (pool, _states) = test_pool(&["first", "second"]);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get("second").unwrap().id(), "second");
        assert!(pool.get("missing").is_none());

        let order: Vec<_> = pool.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(order, ["first", "second"]);
    }
}
