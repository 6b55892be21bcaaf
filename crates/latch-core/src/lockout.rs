//! Optional brute-force protection for code entry
//!
//! Without a policy a controller accepts unlimited attempts. With one, the
//! `free_attempts`-th wrong code starts the ladder: it and every further
//! wrong code block entry for the next delay, and the last delay repeats
//! once the ladder is exhausted.
//!
//! Failure counts are persisted next to the credential, so restarting the
//! app does not reset them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Escalating delays after repeated wrong codes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Consecutive wrong codes that trigger the first delay
    pub free_attempts: u32,
    /// Delay ladder in seconds
    pub delays_secs: Vec<u64>,
}

impl Default for LockoutPolicy {
    /// Ladder modelled on phone lock screens: 1, 5, 15, then 60 minutes
    fn default() -> Self {
        Self {
            free_attempts: 5,
            delays_secs: vec![60, 5 * 60, 15 * 60, 60 * 60],
        }
    }
}

impl LockoutPolicy {
    /// Short ladder for screens guarding sensitive settings
    pub fn strict() -> Self {
        Self {
            free_attempts: 3,
            delays_secs: vec![30, 5 * 60, 30 * 60, 24 * 60 * 60],
        }
    }

    /// Delay imposed after `failures` consecutive wrong codes
    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        let step = failures.checked_sub(self.free_attempts)? as usize;
        let secs = self
            .delays_secs
            .get(step)
            .or_else(|| self.delays_secs.last())?;
        Some(Duration::from_secs(*secs))
    }

    /// Whether `failures` wrong codes trigger a delay at all
    pub fn blocks_after(&self, failures: u32) -> bool {
        self.delay_after(failures).is_some()
    }

    /// Wrong codes left before the first delay
    pub fn attempts_left(&self, failures: u32) -> u32 {
        self.free_attempts.saturating_sub(failures)
    }

    /// Time until code entry is allowed again, `None` if it is allowed now
    pub fn remaining(&self, record: &FailureRecord, now: DateTime<Utc>) -> Option<Duration> {
        let delay = self.delay_after(record.failed_attempts)?;
        let since = now
            .signed_duration_since(record.last_failed_at?)
            .to_std()
            .unwrap_or_default();
        Some(delay.saturating_sub(since)).filter(|left| !left.is_zero())
    }

    /// Status line for a lock screen
    pub fn describe(&self, failures: u32) -> String {
        match self.delay_after(failures) {
            Some(delay) => format!("Try again in {}", humanize(delay)),
            None => match self.attempts_left(failures) {
                1 => "1 attempt left".to_string(),
                left => format!("{} attempts left", left),
            },
        }
    }
}

fn humanize(delay: Duration) -> String {
    let secs = delay.as_secs();
    let (amount, unit) = match secs {
        0..=59 => (secs, "second"),
        60..=3599 => (secs / 60, "minute"),
        3600..=86399 => (secs / 3600, "hour"),
        _ => (secs / 86400, "day"),
    };
    if amount == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", amount, unit)
    }
}

/// Persisted consecutive-failure counter for one credential
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Consecutive wrong codes
    pub failed_attempts: u32,
    /// Time of the latest wrong code
    pub last_failed_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    /// Count one more wrong code at `now`
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, None)]
    #[case(4, None)]
    #[case(5, Some(60))]
    #[case(6, Some(300))]
    #[case(8, Some(3600))]
    #[case(40, Some(3600))]
    fn test_default_ladder(#[case] failures: u32, #[case] secs: Option<u64>) {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.delay_after(failures), secs.map(Duration::from_secs));
    }

    #[test]
    fn test_strict_ladder() {
        let policy = LockoutPolicy::strict();
        assert!(!policy.blocks_after(2));
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_after(6), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_empty_ladder_never_blocks() {
        let policy = LockoutPolicy {
            free_attempts: 1,
            delays_secs: vec![],
        };
        assert!(!policy.blocks_after(10));
        assert_eq!(policy.describe(10), "0 attempts left");
    }

    #[test]
    fn test_remaining_counts_down_from_last_failure() {
        let policy = LockoutPolicy::strict();
        let start = Utc::now();
        let mut record = FailureRecord::default();
        for _ in 0..3 {
            record.record_failure(start);
        }

        let remaining = policy.remaining(&record, start + chrono::Duration::seconds(10));
        assert_eq!(remaining, Some(Duration::from_secs(20)));
        assert!(policy.remaining(&record, start + chrono::Duration::seconds(30)).is_none());
    }

    #[test]
    fn test_remaining_without_timestamp() {
        let policy = LockoutPolicy::strict();
        let record = FailureRecord {
            failed_attempts: 5,
            last_failed_at: None,
        };
        assert!(policy.remaining(&record, Utc::now()).is_none());
    }

    #[rstest]
    #[case(1, "2 attempts left")]
    #[case(2, "1 attempt left")]
    #[case(3, "Try again in 30 seconds")]
    #[case(4, "Try again in 5 minutes")]
    #[case(9, "Try again in 1 day")]
    fn test_describe(#[case] failures: u32, #[case] expected: &str) {
        assert_eq!(LockoutPolicy::strict().describe(failures), expected);
    }
}
