//! Configuration loading and validation.

mod loader;
mod types;

pub use types::{AuthCredential, Config, HttpConfig, LoggingConfig, PeerConfig, ServerConfig};
