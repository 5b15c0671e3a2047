//! Destination-based peer routing.

mod router;

pub use router::Router;
