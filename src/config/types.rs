use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for smppgw
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream SMPP peers the bridge binds to as a client
    #[serde(default)]
    pub smpp_peers: Vec<PeerConfig>,

    /// Local SMPP server for ESME clients
    #[serde(default)]
    pub smpp_server: ServerConfig,

    /// HTTP ingress server and SMSC egress target
    pub http_server: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One upstream SMPP peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Unique peer id (used in logs and routing)
    pub id: String,

    /// Peer host
    pub ipaddress: String,

    /// Peer port
    pub port: u16,

    /// Bind system_id
    pub system_id: String,

    /// Bind password
    pub password: String,

    /// Optional system_type sent in the bind
    #[serde(default)]
    pub system_type: Option<String>,

    /// TON/NPI used for submit_sm source addresses
    #[serde(default = "default_ton_npi")]
    pub source_addr_ton: u8,
    #[serde(default = "default_ton_npi")]
    pub source_addr_npi: u8,

    /// TON/NPI used for submit_sm destination addresses
    #[serde(default = "default_ton_npi")]
    pub dest_addr_ton: u8,
    #[serde(default = "default_ton_npi")]
    pub dest_addr_npi: u8,

    /// Milliseconds between reconnect attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval: u64,

    /// Seconds of writer idleness before an enquire_link is sent
    #[serde(default = "default_enquire_link_secs")]
    pub enquire_link_interval: u64,

    /// Seconds to wait for a response PDU
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout: u64,

    /// Destination regex for routing; peers without one only serve as default
    #[serde(default)]
    pub route_regex: Option<String>,

    /// Fallback peer when no regex matches
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

impl PeerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ipaddress, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    pub fn enquire_link_delay(&self) -> Duration {
        Duration::from_secs(self.enquire_link_interval)
    }

    pub fn response_deadline(&self) -> Duration {
        Duration::from_secs(self.response_timeout)
    }
}

/// Local SMPP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_smpp_port")]
    pub port: u16,

    /// Maximum concurrent ESME connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Accepted ESME credentials
    #[serde(default)]
    pub auth: Vec<AuthCredential>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_smpp_port(),
            max_connections: default_max_connections(),
            auth: Vec::new(),
        }
    }
}

/// ESME credential for the local SMPP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCredential {
    pub system_id: String,
    pub password: String,
}

/// HTTP ingress server and SMSC egress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    pub port: u16,

    /// Base URL the bridge forwards inbound SMS to
    pub kamailio_url: String,

    /// Seconds /send_sms waits for any peer to be bound
    #[serde(default = "default_peer_wait_secs")]
    pub peer_wait_timeout: u64,
}

impl HttpConfig {
    pub fn peer_wait(&self) -> Duration {
        Duration::from_secs(self.peer_wait_timeout)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file; console-only when unset
    #[serde(default)]
    pub file_path: Option<String>,

    /// Rotation size hint, e.g. "20m" (rotation itself is daily)
    #[serde(default = "default_max_size")]
    pub max_size: String,

    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_true")]
    pub console_enabled: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            max_size: default_max_size(),
            max_files: default_max_files(),
            console_enabled: true,
            log_level: default_log_level(),
        }
    }
}

fn default_ton_npi() -> u8 {
    1
}

fn default_reconnect_interval_ms() -> u64 {
    10_000
}

fn default_enquire_link_secs() -> u64 {
    30
}

fn default_response_timeout_secs() -> u64 {
    10
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_smpp_port() -> u16 {
    2775
}

fn default_max_connections() -> usize {
    64
}

fn default_peer_wait_secs() -> u64 {
    15
}

fn default_max_size() -> String {
    "20m".to_string()
}

fn default_max_files() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
