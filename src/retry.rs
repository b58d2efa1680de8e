use crate::error::FetchError;

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Telemetry hook invoked before each retry wait. Must not affect control
/// flow; the policy ignores anything it does.
pub type OnRetry = Arc<dyn Fn(u32, &FetchError) + Send + Sync>;

/// Bounded exponential-backoff retry for fetch operations.
///
/// Failures classified [`ErrorKind::Terminal`](crate::ErrorKind::Terminal)
/// or [`ErrorKind::Aborted`](crate::ErrorKind::Aborted) are rethrown
/// immediately; transient failures are re-attempted up to `max_attempts`
/// total attempts.
#[derive(Clone)]
pub struct RetryPolicy {
  pub(crate) max_attempts: u32,
  pub(crate) initial_delay: Duration,
  pub(crate) max_delay: Duration,
  pub(crate) backoff: bool,
  pub(crate) jitter: bool,
  pub(crate) on_retry: Option<OnRetry>,
}

impl std::fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("initial_delay", &self.initial_delay)
      .field("max_delay", &self.max_delay)
      .field("backoff", &self.backoff)
      .field("jitter", &self.jitter)
      .field("has_on_retry", &self.on_retry.is_some())
      .finish()
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
      backoff: true,
      jitter: false,
      on_retry: None,
    }
  }
}

impl RetryPolicy {
  pub fn new() -> Self {
    Self::default()
  }

  /// Total number of attempts, including the first. Must be at least 1.
  pub fn max_attempts(mut self, attempts: u32) -> Self {
    self.max_attempts = attempts;
    self
  }

  /// Delay before the first retry.
  pub fn initial_delay(mut self, delay: Duration) -> Self {
    self.initial_delay = delay;
    self
  }

  /// Ceiling applied to the backoff growth.
  pub fn max_delay(mut self, delay: Duration) -> Self {
    self.max_delay = delay;
    self
  }

  /// Enables or disables exponential growth of the delay. When disabled the
  /// delay between attempts is constant at `initial_delay`.
  pub fn backoff(mut self, enabled: bool) -> Self {
    self.backoff = enabled;
    self
  }

  /// Adds up to 50% random jitter to each delay.
  pub fn jitter(mut self, enabled: bool) -> Self {
    self.jitter = enabled;
    self
  }

  /// Registers a telemetry callback fired before each retry wait.
  pub fn on_retry(mut self, f: impl Fn(u32, &FetchError) + Send + Sync + 'static) -> Self {
    self.on_retry = Some(Arc::new(f));
    self
  }

  /// The delay preceding retry number `attempt` (1-based).
  pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
    let base = if self.backoff {
      // initial_delay * 2^(attempt-1), clamped.
      let exp = attempt.saturating_sub(1).min(31);
      self
        .initial_delay
        .saturating_mul(1u32 << exp)
        .min(self.max_delay)
    } else {
      self.initial_delay
    };

    if self.jitter {
      let factor: f64 = rand::rng().random_range(0.0..0.5);
      base + base.mul_f64(factor)
    } else {
      base
    }
  }

  /// Runs `op`, retrying transient failures until success or exhaustion.
  pub async fn run<V, F, Fut>(&self, op: F) -> Result<V, FetchError>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<V, FetchError>>,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if !err.is_retryable() => return Err(err),
        Err(err) if attempt >= max_attempts => return Err(err),
        Err(err) => {
          if let Some(on_retry) = &self.on_retry {
            on_retry(attempt, &err);
          }
          let delay = self.delay_for(attempt);
          debug!(attempt, max_attempts, ?delay, error = %err, "retrying fetch");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_jittered_delay_stays_bounded() {
    let policy = RetryPolicy::new()
      .initial_delay(Duration::from_secs(1))
      .jitter(true);

    // Jitter adds 0..50% on top of the base delay for that attempt.
    for attempt in 1..=3 {
      let base = Duration::from_secs(1 << (attempt - 1));
      for _ in 0..200 {
        let delay = policy.delay_for(attempt as u32);
        assert!(delay >= base, "jitter must never shorten the delay");
        assert!(delay < base + base.mul_f64(0.5), "jitter is capped at 50%");
      }
    }
  }

  #[test]
  fn test_unjittered_delay_is_exact() {
    let policy = RetryPolicy::new().initial_delay(Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    assert_eq!(policy.delay_for(3), Duration::from_secs(4));
  }
}
