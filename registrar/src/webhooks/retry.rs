//! Retry schedule and failure classification for webhook deliveries.

use std::time::Duration;

use crate::config::WebhookConfig;
use crate::db::models::webhooks::{DeliveryStatus, FailureRecord};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }

    /// Delay before the next attempt after the `n`th failure: `min(base * 2^(n-1), max)`.
    pub fn backoff_delay(&self, n: i32) -> Duration {
        let exponent = n.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .checked_mul(2u32.saturating_pow(exponent))
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }

    /// Where a delivery goes after a failed attempt.
    ///
    /// `retry_count` is the count before this attempt. An already exhausted
    /// delivery (manual retry) stays exhausted without opening a new failure period.
    pub fn on_failure(&self, previous: DeliveryStatus, retry_count: i32) -> FailureRecord {
        if previous == DeliveryStatus::Exhausted {
            return FailureRecord {
                status: DeliveryStatus::Exhausted,
                became_exhausted: false,
            };
        }

        if retry_count + 1 >= self.max_retries {
            FailureRecord {
                status: DeliveryStatus::Exhausted,
                became_exhausted: true,
            }
        } else {
            FailureRecord {
                status: DeliveryStatus::Failed,
                became_exhausted: false,
            }
        }
    }
}
