//! Caller-side retry for fetches from storage.
//!
//! The engine never retries; code sitting between storage and the engine
//! wraps its fetches with [`fetch_with_retry`] and a per-request
//! [`RequestContext`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

/// How many times to retry and how long to wait before attempt `n`.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    backoff: Arc<BackoffFn>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new<F>(max_retries: u32, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_retries,
            backoff: Arc::new(backoff),
        }
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self::new(0, |_| Duration::ZERO)
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(max_retries, move |_| delay)
    }

    /// `base * 2^(retry-1)`, capped at `cap`.
    pub fn exponential(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self::new(max_retries, move |retry| {
            let factor = 1u32 << retry.saturating_sub(1).min(20);
            base.saturating_mul(factor).min(cap)
        })
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        (self.backoff)(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}

/// Per-request context handed explicitly to each call.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub retry: RetryPolicy,
    /// No retry is started once this instant has passed.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Run `op` until it succeeds, the retry budget is spent, or the deadline
/// passes. `op` receives the 0-based attempt number.
pub fn fetch_with_retry<T, F>(ctx: &RequestContext, mut op: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> anyhow::Result<T>,
{
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < ctx.retry.max_retries && !ctx.expired() => {
                attempt += 1;
                let delay = ctx.retry.backoff(attempt);
                warn!(request = %ctx.request_id, attempt, ?delay, error = %e, "fetch failed; retrying");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => {
                return Err(e.context(format!(
                    "request {} failed after {} attempts",
                    ctx.request_id,
                    attempt + 1
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn retries_until_success() {
        let ctx = RequestContext::new("r1").with_retry(RetryPolicy::fixed(3, Duration::ZERO));
        let got = fetch_with_retry(&ctx, |attempt| {
            if attempt < 2 {
                Err(anyhow!("storage unavailable"))
            } else {
                Ok(attempt)
            }
        })
        .unwrap();
        assert_eq!(got, 2);
    }

    #[test]
    fn gives_up_after_budget() {
        let ctx = RequestContext::new("r2").with_retry(RetryPolicy::fixed(1, Duration::ZERO));
        let mut calls = 0;
        let err = fetch_with_retry::<(), _>(&ctx, |_| {
            calls += 1;
            Err(anyhow!("down"))
        })
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(err.to_string().contains("after 2 attempts"));
    }

    #[test]
    fn expired_deadline_stops_retries() {
        let ctx = RequestContext::new("r3")
            .with_retry(RetryPolicy::fixed(5, Duration::ZERO))
            .with_deadline(Instant::now());
        let mut calls = 0;
        assert!(fetch_with_retry::<(), _>(&ctx, |_| {
            calls += 1;
            Err(anyhow!("down"))
        })
        .is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let p = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(9), Duration::from_secs(1));
    }
}
