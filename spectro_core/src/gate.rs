//! Single-permit gate serializing logical device transactions.
//!
//! The transport is half-duplex: a request and the response that answers it
//! must not interleave with another caller's exchange. Every multi-step
//! exchange (parameter write, spectrum request + read, EEPROM page, laser
//! frame, battery poll) runs while holding a [`GateGuard`].

use crossbeam_channel as xch;
use std::time::Duration;

/// Cloneable handle to one shared permit.
#[derive(Debug, Clone)]
pub struct TransactionGate {
    tx: xch::Sender<()>,
    rx: xch::Receiver<()>,
}

impl Default for TransactionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionGate {
    pub fn new() -> Self {
        let (tx, rx) = xch::bounded(1);
        // Permit starts available; the channel has room, so this cannot fail.
        let _ = tx.try_send(());
        Self { tx, rx }
    }

    /// Wait up to `timeout` for the permit. `None` means busy, which callers
    /// treat as retryable.
    pub fn try_acquire(&self, timeout: Duration) -> Option<GateGuard> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Some(GateGuard {
                tx: self.tx.clone(),
            }),
            Err(_) => {
                tracing::trace!(?timeout, "transaction gate busy");
                None
            }
        }
    }

    /// Whether the permit is currently free.
    pub fn is_available(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Held permit; returned to the gate on drop.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard {
    tx: xch::Sender<()>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}
