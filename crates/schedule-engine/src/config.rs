//! Tunables for holds, replay, recurrence expansion and slot search.

use std::env;

use chrono::Duration;

use crate::error::{Result, SchedulingError};
use crate::expander::{ExpansionLimits, MAX_HORIZON_DAYS};
use crate::hold::{DEFAULT_HOLD_SECONDS, MAX_HOLD_SECONDS};
use crate::suggest::{SuggestOptions, MAX_SEARCH_DAYS, MAX_STEP_MINUTES};

/// Longest a completed booking is replayed for: 30 days.
pub const MAX_REPLAY_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Configuration shared by the booking coordinator and the pure operations.
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    /// Hold lifetime when a request does not name one.
    pub default_hold_seconds: i64,
    /// How long a completed booking result is replayed for its key.
    pub replay_ttl: Duration,
    pub expansion: ExpansionLimits,
    pub suggest: SuggestOptions,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_hold_seconds: DEFAULT_HOLD_SECONDS,
            replay_ttl: Duration::hours(24),
            expansion: ExpansionLimits::default(),
            suggest: SuggestOptions::default(),
        }
    }
}

impl SchedulingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hold_seconds(mut self, seconds: i64) -> Self {
        self.default_hold_seconds = seconds;
        self
    }

    pub fn with_replay_ttl(mut self, ttl: Duration) -> Self {
        self.replay_ttl = ttl;
        self
    }

    pub fn with_expansion_limits(mut self, limits: ExpansionLimits) -> Self {
        self.expansion = limits;
        self
    }

    pub fn with_suggest_options(mut self, options: SuggestOptions) -> Self {
        self.suggest = options;
        self
    }

    /// Load overrides from the process environment.
    ///
    /// # Environment Variables
    /// - `SCHEDULE_HOLD_SECONDS` (default 300, at most 3600)
    /// - `SCHEDULE_REPLAY_TTL_SECONDS` (default 86400, at most 2592000)
    /// - `SCHEDULE_HORIZON_DAYS` (default 365, at most 3650)
    /// - `SCHEDULE_SEARCH_DAYS` (default 3, at most 31)
    /// - `SCHEDULE_STEP_MINUTES` (default 15, at most 1440)
    ///
    /// # Errors
    /// Returns `SchedulingError::Validation` when a variable is set but is not
    /// a positive integer within its bound.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(seconds) = read_bounded(&lookup, "SCHEDULE_HOLD_SECONDS", MAX_HOLD_SECONDS)? {
            config.default_hold_seconds = seconds;
        }
        if let Some(seconds) =
            read_bounded(&lookup, "SCHEDULE_REPLAY_TTL_SECONDS", MAX_REPLAY_TTL_SECONDS)?
        {
            config.replay_ttl = Duration::seconds(seconds);
        }
        if let Some(days) = read_bounded(&lookup, "SCHEDULE_HORIZON_DAYS", MAX_HORIZON_DAYS)? {
            config.expansion.horizon = Duration::days(days);
        }
        if let Some(days) = read_bounded(&lookup, "SCHEDULE_SEARCH_DAYS", MAX_SEARCH_DAYS)? {
            config.suggest.search_days = days;
        }
        if let Some(minutes) = read_bounded(&lookup, "SCHEDULE_STEP_MINUTES", MAX_STEP_MINUTES)? {
            config.suggest.step_minutes = minutes;
        }

        Ok(config)
    }
}

fn read_bounded(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    max: i64,
) -> Result<Option<i64>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if (1..=max).contains(&value) => Ok(Some(value)),
        Ok(_) => Err(SchedulingError::Validation(format!(
            "{} must be between 1 and {}, got '{}'",
            name, max, raw
        ))),
        Err(_) => Err(SchedulingError::Validation(format!(
            "{} must be a positive integer, got '{}'",
            name, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = SchedulingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.default_hold_seconds, 300);
        assert_eq!(config.replay_ttl, Duration::hours(24));
        assert_eq!(config.expansion.max_occurrences, 520);
        assert_eq!(config.suggest.search_days, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let config = SchedulingConfig::from_lookup(lookup(&[
            ("SCHEDULE_HOLD_SECONDS", "120"),
            ("SCHEDULE_HORIZON_DAYS", "90"),
            ("SCHEDULE_STEP_MINUTES", "30"),
        ]))
        .unwrap();
        assert_eq!(config.default_hold_seconds, 120);
        assert_eq!(config.expansion.horizon, Duration::days(90));
        assert_eq!(config.suggest.step_minutes, 30);
    }

    #[test]
    fn rejects_garbage_and_out_of_range() {
        assert!(SchedulingConfig::from_lookup(lookup(&[("SCHEDULE_SEARCH_DAYS", "soon")])).is_err());
        assert!(SchedulingConfig::from_lookup(lookup(&[("SCHEDULE_STEP_MINUTES", "0")])).is_err());
        assert!(SchedulingConfig::from_lookup(lookup(&[("SCHEDULE_HOLD_SECONDS", "7200")])).is_err());
    }

    #[test]
    fn huge_windows_are_rejected_not_overflowed() {
        for (name, value) in [
            ("SCHEDULE_HORIZON_DAYS", "1000000000"),
            ("SCHEDULE_HORIZON_DAYS", "3651"),
            ("SCHEDULE_SEARCH_DAYS", "32"),
            ("SCHEDULE_STEP_MINUTES", "1441"),
            ("SCHEDULE_REPLAY_TTL_SECONDS", "9223372036854775807"),
        ] {
            let error = SchedulingConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
            assert!(error.to_string().contains(name), "{error}");
        }

        let config = SchedulingConfig::from_lookup(lookup(&[
            ("SCHEDULE_HORIZON_DAYS", "3650"),
            ("SCHEDULE_SEARCH_DAYS", "31"),
        ]))
        .unwrap();
        assert_eq!(config.expansion.horizon, Duration::days(3650));
        assert_eq!(config.suggest.search_days, 31);
    }
}
