//! Bidirectional bridge between an HTTP SMS control plane and SMPP v3.4
//! peers: HTTP submissions go out as `submit_sm`, inbound `deliver_sm` (MO
//! SMS and delivery receipts) comes back over HTTP, and a local SMPP server
//! accepts ESME traffic.

pub mod bootstrap;
pub mod config;
pub mod http;
pub mod listener;
pub mod peer;
pub mod proto;
pub mod router;
pub mod telemetry;
