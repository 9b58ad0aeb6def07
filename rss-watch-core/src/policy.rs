use std::sync::Arc;

use tokio::sync::watch;

use crate::error::WatchError;
use crate::events::{ErrorReported, EventBus};

/// Decides whether a reported error stops the watchdog.
///
/// With `exit_on_error` set, the first error published on the bus latches a
/// halt reason that every running loop observes.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    exit_on_error: bool,
    halt_tx: Arc<watch::Sender<Option<String>>>,
}

impl ErrorPolicy {
    pub fn new(exit_on_error: bool) -> Self {
        let (halt_tx, _) = watch::channel(None);
        Self {
            exit_on_error,
            halt_tx: Arc::new(halt_tx),
        }
    }

    pub fn attach(&self, bus: &EventBus) {
        if !self.exit_on_error {
            return;
        }
        let halt_tx = Arc::clone(&self.halt_tx);
        bus.subscribe::<ErrorReported>(move |err: &WatchError| {
            halt_tx.send_if_modified(|reason| {
                if reason.is_some() {
                    return false;
                }
                *reason = Some(err.to_string());
                true
            });
            Ok(())
        });
    }

    /// Publishes `err`, then returns [`WatchError::Halted`] if the watchdog
    /// must stop.
    pub fn report(&self, bus: &EventBus, err: WatchError) -> Result<(), WatchError> {
        bus.publish::<ErrorReported>(&err);
        self.check()
    }

    pub fn check(&self) -> Result<(), WatchError> {
        match self.halt_reason() {
            Some(reason) => Err(WatchError::Halted { reason }),
            None => Ok(()),
        }
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halt_tx.borrow().clone()
    }

    pub fn subscribe_halt(&self) -> watch::Receiver<Option<String>> {
        self.halt_tx.subscribe()
    }
}
