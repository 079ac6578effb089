//! Retry accounting and exponential backoff eligibility.
//!
//! Backoff is a selection filter: an item whose delay has not elapsed is left
//! `pending` for a later pass instead of being waited on.

use super::types::{ItemStatus, QueuedItem};
use crate::config::{BackoffConfig, QueueConfig};
use chrono::{DateTime, Duration, Utc};

/// Retry strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    /// Failed attempts before an item becomes terminally `failed`
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, backoff: &BackoffConfig) -> Self {
        Self {
            max_retries,
            base_delay_ms: backoff.base_delay_ms,
            multiplier: backoff.multiplier,
            max_delay_ms: backoff.max_delay_ms,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_retries, &config.backoff)
    }

    /// Whether an item with `attempt` failures may be tried again automatically
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Minimum delay after the `attempt`-th failure:
    /// `min(base * multiplier^attempt, max)`
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (self.base_delay_ms as f64) * self.multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            delay_ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::milliseconds(capped.round() as i64)
    }

    /// Earliest time the item may be attempted again, `None` when it may go now
    pub fn next_eligible_at(&self, item: &QueuedItem) -> Option<DateTime<Utc>> {
        if item.attempt == 0 {
            return None;
        }
        let last_attempt = item.last_attempt_at?;
        Some(last_attempt + self.calculate_backoff(item.attempt))
    }

    /// Backoff gate for pending items
    pub fn is_eligible(&self, item: &QueuedItem, now: DateTime<Utc>) -> bool {
        item.status == ItemStatus::Pending
            && self
                .next_eligible_at(item)
                .map(|eligible_at| now >= eligible_at)
                .unwrap_or(true)
    }

    /// Record a failed attempt; returns the resulting status
    pub fn record_failure(&self, item: &mut QueuedItem, error: String) -> ItemStatus {
        item.attempt = item.attempt.saturating_add(1).min(self.max_retries);
        item.last_error = Some(error);
        item.status = if self.should_retry(item.attempt) {
            ItemStatus::Pending
        } else {
            ItemStatus::Failed
        };
        item.status
    }
}
