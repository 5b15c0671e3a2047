use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.smpp_peers.is_empty() {
            anyhow::bail!("at least one smpp_peers entry must be defined");
        }

        let mut peer_ids = HashSet::new();
        for peer in &self.smpp_peers {
            if !peer_ids.insert(&peer.id) {
                anyhow::bail!("duplicate peer id: {}", peer.id);
            }
            if peer.ipaddress.is_empty() {
                anyhow::bail!("peer '{}' has an empty ipaddress", peer.id);
            }
        }

        let mut auth_ids = HashSet::new();
        for cred in &self.smpp_server.auth {
            if !auth_ids.insert(&cred.system_id) {
                anyhow::bail!("duplicate smpp_server auth system_id: {}", cred.system_id);
            }
        }

        if self.http_server.kamailio_url.is_empty() {
            anyhow::bail!("http_server.kamailio_url must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let yaml = r#"
smpp_peers:
  - id: carrier-a
    ipaddress: 10.0.0.1
    port: 2775
    system_id: bridge
    password: pass
    default: true

http_server:
  bind_ip: 127.0.0.1
  port: 8080
  kamailio_url: "http://smsc.example.net/sms"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.smpp_peers.len(), 1);

        let peer = &config.smpp_peers[0];
        assert_eq!(peer.address(), "10.0.0.1:2775");
        assert!(peer.is_default);
        assert_eq!(peer.source_addr_ton, 1);
        assert_eq!(peer.dest_addr_npi, 1);
        assert_eq!(peer.reconnect_interval, 10_000);
        assert_eq!(peer.enquire_link_interval, 30);
        assert_eq!(peer.response_timeout, 10);

        assert_eq!(config.smpp_server.port, 2775);
        assert_eq!(config.http_server.peer_wait_timeout, 15);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn empty_peer_list_is_rejected() {
        let yaml = r#"
smpp_peers: []
http_server:
  port: 8080
  kamailio_url: "http://smsc.example.net/sms"
"#;

        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("at least one smpp_peers entry"));
    }

    #[test]
    fn duplicate_peer_ids_are_rejected() {
        let yaml = r#"
smpp_peers:
  - id: a
    ipaddress: 10.0.0.1
    port: 2775
    system_id: x
    password: y
  - id: a
    ipaddress: 10.0.0.2
    port: 2775
    system_id: x
    password: y
http_server:
  port: 8080
  kamailio_url: "http://smsc.example.net/sms"
"#;

        let result = Config::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate peer id"));
    }

    #[test]
    fn routing_and_auth_fields_parse() {
        let yaml = r#"
smpp_peers:
  - id: de
    ipaddress: 10.0.0.1
    port: 2775
    system_id: x
    password: y
    route_regex: "^49"
    reconnect_interval: 2000
  - id: fallback
    ipaddress: 10.0.0.2
    port: 2776
    system_id: x
    password: y
    default: true

smpp_server:
  bind_ip: 127.0.0.1
  port: 12775
  auth:
    - system_id: esme1
      password: pw1

http_server:
  port: 8080
  kamailio_url: "http://smsc.example.net/sms"
  peer_wait_timeout: 1
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.smpp_peers[0].route_regex.as_deref(), Some("^49"));
        assert_eq!(
            config.smpp_peers[0].reconnect_delay(),
            std::time::Duration::from_millis(2000)
        );
        assert!(config.smpp_peers[1].is_default);
        assert_eq!(config.smpp_server.auth.len(), 1);
        assert_eq!(config.http_server.peer_wait(), std::time::Duration::from_secs(1));
    }
}
