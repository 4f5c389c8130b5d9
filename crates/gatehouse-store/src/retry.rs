//! Managed transactions with bounded retry.

use std::time::Duration;

use futures::future::BoxFuture;
use gatehouse_errors::{Code, Error, Result, is_retryable};
use rand::Rng;

use crate::{Backend, Transaction, context::Context};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(50);

/// Delay between two attempts of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^retry`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    Constant(Duration),
}

impl Backoff {
    /// Delay before retry number `retry` (0 based), without jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Exponential { base, max } => {
                base.saturating_mul(2u32.saturating_pow(retry)).min(max)
            },
            Backoff::Constant(delay) => delay,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { base: DEFAULT_BACKOFF_BASE, max: DEFAULT_BACKOFF_MAX }
    }
}

/// How often and how patiently [`do_tx`] retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Upper bound of the random delay added to every backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Runs `body` inside a transaction and commits it.
///
/// The whole body is re-run on a fresh transaction when it or the commit
/// fails with a retryable store error, up to `policy.max_retries` times.
/// Any other error rolls the transaction back and is returned as is.
/// Returns the body's value and the number of retries it took.
///
/// The body receives the transaction by mutable reference and must return
/// a boxed future borrowing it:
///
/// ```ignore
/// let (row, _) = do_tx(&backend, &ctx, &policy, |tx| {
///     let row = row.clone();
///     Box::pin(async move { tx.create("widget", row, WriteOptions::new()).await })
/// })
/// .await?;
/// ```
///
/// # Errors
///
/// Returns `Canceled` when `ctx` is done before an attempt or during a
/// backoff sleep, and `MaxRetries` wrapping the last failure once the retry
/// budget is spent.
pub async fn do_tx<B, T, F>(
    backend: &B,
    ctx: &Context,
    policy: &RetryPolicy,
    mut body: F,
) -> Result<(T, u32)>
where
    B: Backend,
    T: Send,
    F: for<'t> FnMut(&'t mut B::Tx) -> BoxFuture<'t, Result<T>> + Send,
{
    const OP: &str = "store.do_tx";
    let mut retries = 0u32;

    loop {
        ctx.check(OP)?;

        let mut tx = backend.begin().await?;
        let result = body(&mut tx).await;
        let outcome = match result {
            Ok(value) => tx.commit().await.map(|()| value),
            Err(e) => {
                tx.rollback().await;
                Err(e)
            },
        };

        let err = match outcome {
            Ok(value) => return Ok((value, retries)),
            Err(e) if is_retryable(&e) => e,
            Err(e) => return Err(e),
        };

        if retries >= policy.max_retries {
            return Err(Error::new(Code::MaxRetries, OP)
                .with_msg(format!(
                    "too many retries: {} of {}",
                    retries + 1,
                    policy.max_retries + 1
                ))
                .with_wrap(err));
        }

        let delay = policy.backoff.delay(retries) + policy.jitter();
        tracing::warn!(
            retry = retries + 1,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Retrying transaction"
        );
        ctx.sleep(delay, OP).await?;
        retries += 1;
    }
}
