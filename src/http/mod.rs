//! HTTP surfaces: the `/send_sms` ingress and the SMSC egress client.

mod egress;
mod ingress;

pub use egress::{EgressError, InboundSms, SmscClient};
pub use ingress::HttpServer;
