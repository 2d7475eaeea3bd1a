//! Batch-wide cancellation.
//!
//! A [`CancelSource`] is created before any work starts and cloned into every
//! component that can block. It fires at most once: the first caller of
//! [`CancelSource::cancel`] sets the cause and every later call is a no-op.
//! Tests inject a fresh or pre-cancelled source instead of delivering signals.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Why a [`CancelSource`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The process received an interrupt signal.
    Interrupted,
    /// Another target failed and the batch is being wound down.
    PeerFailed,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Interrupted => write!(f, "interrupted"),
            CancelCause::PeerFailed => write!(f, "another target failed"),
        }
    }
}

/// A cloneable, one-way cancellation flag shared by the orchestrator and
/// every in-flight refresh.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Arc<watch::Sender<Option<CancelCause>>>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel with `cause`. Returns `true` only for the call that actually
    /// fired the source.
    pub fn cancel(&self, cause: CancelCause) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause);
            true
        })
    }

    pub fn cause(&self) -> Option<CancelCause> {
        *self.tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolve once the source has fired, yielding the recorded cause.
    ///
    /// Resolves immediately if the source is already cancelled.
    pub async fn cancelled(&self) -> CancelCause {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(cause) = *rx.borrow_and_update() {
                return cause;
            }
            // The sender lives as long as `self`, so `changed` cannot fail here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Cancel with [`CancelCause::Interrupted`] on the first Ctrl-C.
    ///
    /// Must be called from within a Tokio runtime. The returned handle can be
    /// aborted once the batch is over.
    pub fn cancel_on_interrupt(&self) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("interrupt received, cancelling remaining refreshes");
                    source.cancel(CancelCause::Interrupted);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for interrupt signal");
                }
            }
        })
    }
}
