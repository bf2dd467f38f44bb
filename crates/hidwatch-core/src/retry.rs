//! Retry logic for blocking calls that can be interrupted.
//!
//! A signal landing on the monitor thread makes `poll(2)` fail with `EINTR`.
//! That is not a failure of the monitor, so the call is simply reissued.
//! There is no attempt cap and no delay: the wait is retried for as long as
//! the error is classified as transient.

use std::fmt::Display;
use tracing::{debug, trace};

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Number of transient failures absorbed.
    pub interrupts: u32,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
}

/// Retry `operation` while `is_transient` classifies its error as transient.
///
/// Returns the first success or the first non-transient error, along with
/// stats about the attempts.
pub fn retry_while<F, T, E>(
    mut operation: F,
    is_transient: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut stats = RetryStats::default();

    loop {
        stats.attempts = stats.attempts.saturating_add(1);

        match operation() {
            Ok(value) => {
                stats.success = true;
                if stats.interrupts > 0 {
                    debug!(
                        "Operation succeeded after {} interrupted attempts",
                        stats.interrupts
                    );
                }
                return (Ok(value), stats);
            }
            Err(e) if is_transient(&e) => {
                stats.interrupts = stats.interrupts.saturating_add(1);
                trace!("Retrying after transient failure: {}", e);
            }
            Err(e) => {
                debug!("Error is not retryable: {}", e);
                return (Err(e), stats);
            }
        }
    }
}
