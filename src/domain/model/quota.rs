//! Daily usage quota and the midnight reset prediction.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: u32 = 24 * 60 * 60;

/// Daily usage ceiling as reported by the server.
///
/// `daily_usage` is never decremented locally; the server resets it at local
/// midnight and the client only learns that from a later poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    #[serde(default)]
    pub plan: String,
    /// Missing on the wire decodes as 0, which is treated as exhausted
    #[serde(default)]
    pub daily_limit: u32,
    #[serde(default)]
    pub daily_usage: u32,
}

impl QuotaState {
    pub fn new(plan: impl Into<String>, daily_limit: u32, daily_usage: u32) -> Self {
        Self {
            plan: plan.into(),
            daily_limit,
            daily_usage,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_usage)
    }

    /// A zero limit is exhausted regardless of usage (fail closed).
    pub fn is_exhausted(&self) -> bool {
        self.daily_limit == 0 || self.daily_usage >= self.daily_limit
    }
}

/// Next local midnight after `now`.
pub fn next_reset(now: NaiveDateTime) -> NaiveDateTime {
    now.date()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Time remaining until the next local midnight, recomputed from `now` on
/// every call.
pub fn time_until_reset(now: NaiveDateTime) -> ResetCountdown {
    let elapsed = now.num_seconds_from_midnight();
    let remaining = (SECS_PER_DAY - elapsed).min(SECS_PER_DAY - 1);
    ResetCountdown { seconds: remaining }
}

/// Whole seconds until reset, always in `0..86400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResetCountdown {
    pub seconds: u32,
}

impl ResetCountdown {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds))
    }
}

impl fmt::Display for ResetCountdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.seconds / 3600;
        let m = (self.seconds % 3600) / 60;
        let s = self.seconds % 60;
        write!(f, "{:02}:{:02}:{:02}", h, m, s)
    }
}
