//! Coalescing refresh triggers.
//!
//! Any number of sources may ask for a refresh; at most one request is ever
//! pending. Firing while a request is pending is a silent no-op.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// What asked for a refresh. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Startup,
    Periodic,
    Webhook,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Periodic => write!(f, "periodic"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// Sending half, cheap to clone and share between trigger sources.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<TriggerSource>,
}

/// Receiving half, owned by the refresh driver.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<TriggerSource>,
}

/// Create a trigger channel holding at most one pending request.
pub fn refresh_channel() -> (RefreshTrigger, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshTrigger { tx }, TriggerReceiver { rx })
}

impl RefreshTrigger {
    /// Request a refresh. Never blocks.
    ///
    /// Returns `true` if this call queued a request, `false` if one was
    /// already pending (or the driver has gone away).
    pub fn fire(&self, source: TriggerSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(trigger = %source, "refresh already pending, trigger coalesced");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(trigger = %source, "refresh driver stopped, trigger dropped");
                false
            }
        }
    }

    /// Whether a request is waiting to be picked up.
    pub fn is_pending(&self) -> bool {
        !self.tx.is_closed() && self.tx.capacity() == 0
    }
}

impl TriggerReceiver {
    /// Wait for the next pending request. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<TriggerSource> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TriggerSource> {
        self.rx.try_recv().ok()
    }
}
