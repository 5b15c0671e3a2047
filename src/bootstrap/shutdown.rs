use std::sync::Arc;
use tokio::sync::watch;

/// Process shutdown states.
///
/// Running is normal operation; Stopping tells every task to cancel
/// reconnect timers, stop accepting and close its sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
}

/// Watch-channel based shutdown signal shared by all tasks.
pub struct Shutdown {
    state: watch::Sender<ShutdownState>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        Arc::new(Self { state })
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == ShutdownState::Stopping
    }

    /// Move to Stopping; idempotent
    pub fn trigger(&self) {
        self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Stopping;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        assert_eq!(shutdown.state(), ShutdownState::Running);

        shutdown.trigger();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ShutdownState::Stopping);
        assert!(shutdown.is_stopping());

        // second trigger is a no-op
        shutdown.trigger();
        assert!(!rx.has_changed().unwrap());
    }
}
