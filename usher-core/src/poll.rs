//! Bounded cooperative polling.
//!
//! The thread/run protocol finishes work asynchronously, so completion and
//! reconciliation both reduce to "probe until done or out of attempts".
//! [`poll_until`] captures that loop once; callers pick the budget.

use std::future::Future;
use std::time::Duration;

/// Attempt budget for one polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Maximum number of probes.
    pub attempts: u32,
    /// Pause between probes.
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Budget covering roughly `seconds` of waiting with `interval_ms`
    /// between probes.
    pub fn for_duration(seconds: u64, interval_ms: u64) -> Self {
        let interval_ms = interval_ms.max(1);
        let attempts = (seconds * 1000).div_ceil(interval_ms).max(1);
        Self {
            attempts: attempts.min(u32::MAX as u64) as u32,
            interval: Duration::from_millis(interval_ms),
        }
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe produced a value within the budget.
    Completed(T),
    /// The budget ran out before the probe produced a value.
    TimedOut,
}

/// Drive `probe` until it yields a value or the budget is exhausted.
///
/// The probe returns `Ok(None)` to keep waiting and `Ok(Some(_))` when the
/// awaited state is reached. Probe errors end the wait immediately.
pub async fn poll_until<T, E, F, Fut>(
    budget: PollBudget,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 0..budget.attempts {
        if let Some(value) = probe().await? {
            return Ok(PollOutcome::Completed(value));
        }

        // Only sleep if there are more attempts coming.
        if attempt + 1 < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    Ok(PollOutcome::TimedOut)
}
