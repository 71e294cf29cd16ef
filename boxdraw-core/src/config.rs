use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Presentational pause between starting a draw and committing it.
    pub settle_delay: Duration,
    /// Conditional-write attempts before a contended write gives up.
    pub max_write_retries: u32,
    pub min_users: u32,
    pub max_users: u32,
    /// How often the SQLite store checks for writes made by other processes.
    pub poll_interval: Duration,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            max_write_retries: 3,
            min_users: 2,
            max_users: 20,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl LotteryConfig {
    /// No settle delay; used by tests and scripted clients.
    pub fn instant() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn capacity_allowed(&self, capacity: u32) -> bool {
        (self.min_users..=self.max_users).contains(&capacity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_users == 0 {
            return Err(CoreError::config("Minimum capacity must be greater than 0"));
        }

        if self.min_users > self.max_users {
            return Err(CoreError::config(format!(
                "Minimum capacity {} exceeds maximum {}",
                self.min_users, self.max_users
            )));
        }

        if self.max_write_retries == 0 {
            return Err(CoreError::config("At least one write attempt is required"));
        }

        if self.poll_interval.is_zero() {
            return Err(CoreError::config("Poll interval must be greater than 0"));
        }

        Ok(())
    }
}
