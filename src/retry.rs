//! Exponential backoff between resubmissions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tokio_util::sync::CancellationToken;

use crate::{IngestError, IngestResult};

/// Exponential backoff: `initial_delay * factor^(n - 1)` before the n-th retry, capped at
/// `max_delay`, for at most `max_attempts` submissions in total.
#[serde_as]
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_delay: Duration,
    pub factor: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay to wait before the `retry`-th resubmission, counting from 1.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Sleep before the `retry`-th resubmission, returning early if `cancel` fires.
    pub async fn wait(&self, retry: u32, cancel: &CancellationToken) -> IngestResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            _ = tokio::time::sleep(self.delay_for_retry(retry)) => Ok(()),
        }
    }
}
