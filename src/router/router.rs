//! Selects a bound peer for an outbound destination.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::peer::{PeerHandle, PeerPool};

struct RouteEntry {
    peer: Arc<PeerHandle>,
    regex: Option<Regex>,
    is_default: bool,
}

/// Config-order, first-match destination router.
///
/// Regexes are compiled once at startup. A pattern that fails to compile is
/// logged and disqualifies regex routing for that peer only; the peer can
/// still serve as the default fallback.
pub struct Router {
    routes: Vec<RouteEntry>,
}

impl Router {
    pub fn new(pool: &PeerPool) -> Self {
        let routes = pool
            .iter()
            .map(|peer| {
                let config = peer.config();
                let regex = config.route_regex.as_deref().and_then(|pattern| {
                    match Regex::new(pattern) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            warn!(
                                peer = %config.id,
                                pattern = %pattern,
                                error = %e,
                                "invalid route_regex, peer excluded from regex routing"
                            );
                            None
                        }
                    }
                });

                RouteEntry {
                    peer: peer.clone(),
                    regex,
                    is_default: config.is_default,
                }
            })
            .collect();

        Self { routes }
    }

    /// Pick a bound peer for `to`: first regex match in config order, then
    /// the first bound default peer, else none.
    pub fn route(&self, to: &str) -> Option<Arc<PeerHandle>> {
        for entry in &self.routes {
            if !entry.peer.is_bound() {
                continue;
            }
            if let Some(regex) = &entry.regex {
                if regex.is_match(to) {
                    debug!(peer = %entry.peer.id(), to = %to, "route matched");
                    return Some(entry.peer.clone());
                }
            }
        }

        self.routes
            .iter()
            .find(|entry| entry.is_default && entry.peer.is_bound())
            .map(|entry| {
                debug!(peer = %entry.peer.id(), to = %to, "default route");
                entry.peer.clone()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::peer::{test_handle, PeerState};
    use tokio::sync::watch;

    fn peer_config(id: &str, route_regex: Option<&str>, is_default: bool) -> PeerConfig {
        let mut yaml = format!(
            r#"
id: {id}
ipaddress: 127.0.0.1
port: 2775
system_id: test
password: test
default: {is_default}
"#
        );
        if let Some(pattern) = route_regex {
            yaml.push_str(&format!("route_regex: \"{pattern}\"\n"));
        }
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn build_router(
        specs: &[(&str, Option<&str>, bool)],
    ) -> (Router, Vec<watch::Sender<PeerState>>) {
        let mut routes = Vec::new();
        let mut states = Vec::new();

        for (id, pattern, is_default) in specs {
            let config = peer_config(id, *pattern, *is_default);
            let regex = config
                .route_regex
                .as_deref()
                .and_then(|p| Regex::new(p).ok());
            let (peer, state) = test_handle(config);
            routes.push(RouteEntry {
                peer,
                regex,
                is_default: *is_default,
            });
            states.push(state);
        }

        (Router { routes }, states)
    }

    #[test]
    fn first_regex_match_wins_in_config_order() {
        let (router, states) = build_router(&[
            ("de", Some("^49"), false),
            ("catch-all", Some(".*"), false),
        ]);
        states[0].send(PeerState::Bound).unwrap();
        states[1].send(PeerState::Bound).unwrap();

        assert_eq!(router.route("4911").unwrap().id(), "de");
        assert_eq!(router.route("3342012856").unwrap().id(), "catch-all");
    }

    #[test]
    fn unbound_peers_are_skipped() {
        let (router, states) = build_router(&[
            ("de", Some("^49"), false),
            ("fallback", None, true),
        ]);
        states[1].send(PeerState::Bound).unwrap();

        // "de" matches but is not bound, the default takes over
        assert_eq!(router.route("4911").unwrap().id(), "fallback");
    }

    #[test]
    fn default_peer_catches_unmatched_destinations() {
        let (router, states) = build_router(&[
            ("de", Some("^49"), false),
            ("fallback", None, true),
        ]);
        states[0].send(PeerState::Bound).unwrap();
        states[1].send(PeerState::Bound).unwrap();

        assert_eq!(router.route("4911").unwrap().id(), "de");
        assert_eq!(router.route("3342012856").unwrap().id(), "fallback");
    }

    #[test]
    fn no_bound_peer_routes_to_none() {
        let (router, _states) = build_router(&[
            ("de", Some("^49"), false),
            ("fallback", None, true),
        ]);

        assert!(router.route("4911").is_none());
    }

    #[test]
    fn invalid_regex_peer_still_serves_as_default() {
        // "(" does not compile; the peer keeps only its default role
        let (router, states) = build_router(&[("broken", Some("("), true)]);
        states[0].send(PeerState::Bound).unwrap();

        assert_eq!(router.route("123").unwrap().id(), "broken");
    }
}
