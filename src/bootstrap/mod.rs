//! Bridge wiring and process lifecycle.

mod server;
mod shutdown;

pub use server::Bridge;
pub use shutdown::{Shutdown, ShutdownState};
