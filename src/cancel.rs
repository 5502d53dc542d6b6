//! Cooperative cancellation shared across discovery and download tasks.
//!
//! A [`CancelToken`] is cloned into every probe, fetch and chapter iteration.
//! Cancellation is advisory: work already in flight is allowed to finish, and
//! callers check the token before starting the next unit of work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable, set-once cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels this token when the process receives Ctrl-C.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && token.cancel() {
                tracing::warn!("Received interrupt. Stopping gracefully...");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn test_cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_reports_first_call_only() {
        let token = CancelToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }
}
