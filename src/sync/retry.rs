//! Exponential backoff with jitter for transient fetch failures.
use std::time::Duration;

use rand::{thread_rng, Rng};

/// Attempts made before a transient failure is surfaced on the error
/// channel.
pub(crate) const MAX_RETRIES: u32 = 3;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Tracks the attempt counter of one retried operation.
///
/// Long-lived connections reset the counter after a successful (re)connect
/// so a later drop starts its backoff from scratch.
pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new() -> Backoff {
        Backoff { attempt: 0 }
    }

    /// Register a failed attempt. Returns `false` once the retry budget is
    /// exhausted; otherwise sleeps the backoff delay and returns `true`.
    pub(crate) async fn next(&mut self) -> bool {
        self.attempt += 1;
        if self.attempt >= MAX_RETRIES {
            return false;
        }

        tokio::time::sleep(delay(self.attempt)).await;
        true
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Exponential delay for the given attempt, capped at [`MAX_DELAY`], with
/// ±10% jitter so synchronized clients don't retry in lockstep.
fn delay(attempt: u32) -> Duration {
    let exponential = BASE_DELAY
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(MAX_DELAY);

    let jitter = thread_rng().gen_range(-0.1..=0.1);
    exponential.mul_f64(1.0 + jitter)
}
