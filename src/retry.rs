//! Bounded retry with exponential backoff for remote calls.
//!
//! Only errors classified as transient by [`Error::is_transient`] are
//! retried; everything else is returned after the first attempt.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::warn;

const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delays slept between attempts: base, 2x base, 4x base, ... capped.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        std::iter::successors(Some(self.base_delay), |delay| {
            Some(delay.saturating_mul(2).min(MAX_DELAY))
        })
        .map(|delay| delay.min(MAX_DELAY))
        .take(self.max_attempts - 1)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0usize;

        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                let current = attempt;
                let call = op();
                async move {
                    call.await.map_err(|e| {
                        if e.is_transient() && current < max_attempts {
                            warn!(
                                "[{}] Attempt {}/{} failed: {}. Will retry...",
                                label, current, max_attempts, e
                            );
                        }
                        e
                    })
                }
            },
            |e: &Error| e.is_transient(),
        )
        .await
    }
}
