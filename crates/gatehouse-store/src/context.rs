//! Per-call cancellation and deadline carrier.

use std::{sync::Arc, time::Duration};

use gatehouse_errors::{Code, Error};
use tokio::{sync::watch, time::Instant};

/// Cancellation state shared by every clone of a context.
///
/// Cancelling any clone cancels all of them. A deadline, when set, cancels
/// the context once it elapses.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is only cancelled explicitly.
    pub fn background() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { cancel: Arc::new(tx), deadline: None }
    }

    /// Returns a clone that also expires after `timeout`.
    ///
    /// The earlier of the existing and the new deadline wins.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self { cancel: Arc::clone(&self.cancel), deadline: Some(deadline) }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.cancel.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns a `Canceled` error raised at `id` if the context is done.
    pub fn check(&self, id: &str) -> Result<(), Error> {
        if self.is_canceled() {
            return Err(self.canceled_error(id));
        }
        Ok(())
    }

    pub(crate) fn canceled_error(&self, id: &str) -> Error {
        let reason = if *self.cancel.borrow() { "context canceled" } else { "deadline exceeded" };
        Error::new(Code::Canceled, id).with_msg(reason)
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    pub async fn done(&self) {
        let mut rx = self.cancel.subscribe();
        let cancelled = async move {
            // The sender lives as long as `self`, so this only ends on cancel.
            let _ = rx.wait_for(|c| *c).await;
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = cancelled => {},
                    () = tokio::time::sleep_until(deadline) => {},
                }
            },
            None => cancelled.await,
        }
    }

    /// Sleeps for `delay`, returning early with `Canceled` if the context
    /// is done first.
    pub async fn sleep(&self, delay: Duration, id: &str) -> Result<(), Error> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.done() => Err(self.canceled_error(id)),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_not_canceled() {
        let ctx = Context::background();
        assert!(!ctx.is_canceled());
        assert!(ctx.check("test").is_ok());
    }

    #[test]
    fn test_cancel_reaches_clones() {
        let ctx = Context::background();
        let clone = ctx.clone();

        ctx.cancel();

        assert!(clone.is_canceled());
        let err = clone.check("test").unwrap_err();
        assert_eq!(err.code(), Code::Canceled);
        assert_eq!(err.msg(), "context canceled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_canceled());

        ctx.done().await;

        assert!(ctx.is_canceled());
        assert_eq!(ctx.check("test").unwrap_err().msg(), "deadline exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_interrupted_by_cancel() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx.sleep(Duration::from_secs(60), "test").await.unwrap_err();

        assert_eq!(err.code(), Code::Canceled);
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let longer = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(longer.deadline(), ctx.deadline());
    }
}
