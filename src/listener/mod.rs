//! Local SMPP server for ESME clients.

mod acceptor;
mod connection;
mod session;

pub use acceptor::SmppListener;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use session::EsmeSession;
