//! Upstream SMPP peer sessions and the peer pool.

mod pool;
mod session;

pub use pool::PeerPool;
pub use session::{PeerHandle, PeerState, SessionError, SubmitOutcome};

#[cfg(test)]
pub(crate) use session::test_handle;
