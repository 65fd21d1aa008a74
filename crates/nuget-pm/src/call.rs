//! Deadlines and cancellation for boundary calls
//!
//! Every network and cache round trip of the pipeline runs through
//! [`CallPolicy::run`], which races the call against a per-call deadline and
//! a shared cancel signal.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Boundary call being guarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Autocomplete query
    Search,
    /// Version list query
    Versions,
    /// Archive download
    Download,
    /// Client cache write
    CacheWrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Search => "package search",
            Stage::Versions => "version lookup",
            Stage::Download => "package download",
            Stage::CacheWrite => "cache write",
        };
        f.write_str(name)
    }
}

/// Why a guarded call did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The deadline elapsed
    TimedOut(Duration),
    /// The cancel handle fired
    Cancelled,
}

/// Cancels the boundary call currently in flight
///
/// Cheap to clone; all clones drive the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Abort the call in flight; a no-op when nothing is running
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Per-call deadline plus the shared cancel signal
#[derive(Debug, Clone)]
pub struct CallPolicy {
    timeout: Duration,
    cancel: Arc<watch::Sender<bool>>,
}

impl CallPolicy {
    pub fn new(timeout: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            timeout,
            cancel: Arc::new(tx),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Clear a stale cancel request before a new operation starts
    pub fn reset(&self) {
        self.cancel.send_replace(false);
    }

    /// Run one boundary call under the deadline and cancel signal
    pub async fn run<T, F>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        let mut cancelled = self.cancel.subscribe();

        tokio::select! {
            biased;
            _ = cancelled.wait_for(|c| *c) => Err(Interrupted::Cancelled),
            res = tokio::time::timeout(self.timeout, fut) => {
                res.map_err(|_| Interrupted::TimedOut(self.timeout))
            }
        }
    }
}
