//! Recurring-run schedules
//!
//! Fire times come from a [`FireTimeProvider`]. The built-in
//! [`IntervalSchedule`] understands `@every <duration>` rules only.

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::duration::parse_duration;

const EVERY_PREFIX: &str = "@every";

/// When an experiment should fire again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerRule {
    /// Schedule expression, e.g. `@every 10m`
    pub cron: String,
}

impl SchedulerRule {
    /// Rule from an expression
    pub fn new(cron: impl Into<String>) -> Self {
        Self { cron: cron.into() }
    }

    /// Interval of an `@every` rule, None for any other expression
    #[must_use]
    pub fn every(&self) -> Option<Duration> {
        let rest = self.cron.trim().strip_prefix(EVERY_PREFIX)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        parse_duration(rest.trim())
            .ok()
            .filter(|interval| !interval.is_zero())
    }

    /// Reject rules no provider in this crate can fire
    pub fn validate(&self) -> Result<()> {
        if self.cron.trim().is_empty() {
            bail!("Scheduler rule cannot be empty");
        }
        if self.every().is_none() {
            bail!(
                "Unsupported scheduler rule '{}' (expected '@every <duration>', e.g. '@every 10m')",
                self.cron
            );
        }
        Ok(())
    }
}

/// Computes the next fire time of a schedule rule
pub trait FireTimeProvider: Send + Sync {
    /// First fire time strictly after `after`, None if the rule never fires
    fn next_fire_time(&self, rule: &SchedulerRule, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Fixed-interval schedules (`@every 5m`)
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalSchedule;

impl FireTimeProvider for IntervalSchedule {
    fn next_fire_time(&self, rule: &SchedulerRule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(rule.every()?).ok()?;
        after.checked_add_signed(interval)
    }
}
