//! Bounded exponential backoff for store calls and version races.

use crate::CoreError;
use atelier_config::SchedulingConfig;
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl RetryPolicy {
	pub fn new(attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
		Self {
			attempts: attempts.max(1),
			initial_backoff,
			max_backoff: max_backoff.max(initial_backoff),
		}
	}

	/// Policy for transient store failures.
	pub fn store(config: &SchedulingConfig) -> Self {
		Self::new(
			config.store_retries,
			Duration::from_millis(config.initial_backoff_ms),
			Duration::from_millis(config.max_backoff_ms),
		)
	}

	/// Policy for re-running an operation that lost a version race.
	pub fn conflicts(config: &SchedulingConfig) -> Self {
		Self::new(
			config.conflict_retries,
			Duration::from_millis(config.initial_backoff_ms),
			Duration::from_millis(config.max_backoff_ms),
		)
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_backoff)
			.with_max_interval(self.max_backoff)
			// Bounded by attempt count instead
			.with_max_elapsed_time(None)
			.build()
	}

	/// Runs `op` until it succeeds, fails with an error `retryable` rejects,
	/// or the attempts run out. The last error is returned unchanged.
	pub async fn retry_when<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, CoreError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, CoreError>>,
		P: Fn(&CoreError) -> bool,
	{
		let max_attempts = self.attempts;
		let retryable = &retryable;
		let mut attempt = 0u32;

		retry(self.backoff(), move || {
			attempt += 1;
			let current = attempt;
			let call = op();
			async move {
				call.await.map_err(|e| {
					if current < max_attempts && retryable(&e) {
						tracing::debug!(attempt = current, max_attempts, error = %e, "Retrying");
						backoff::Error::transient(e)
					} else {
						backoff::Error::permanent(e)
					}
				})
			}
		})
		.await
	}
}

/// Retries `op` on `StoreUnavailable` only.
pub async fn with_store_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, CoreError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, CoreError>>,
{
	policy.retry_when(op, CoreError::is_transient).await
}

/// Retries `op` on `ConcurrentModification` only.
pub async fn with_conflict_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, CoreError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, CoreError>>,
{
	policy.retry_when(op, CoreError::is_conflict).await
}
