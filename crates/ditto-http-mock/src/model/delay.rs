//! Time units and delays shared by actions, expectations and the scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(value),
            TimeUnit::Microseconds => Duration::from_micros(value),
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(value.saturating_mul(86_400)),
        }
    }
}

/// A delay hint attached to a response or action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delay {
    #[serde(default)]
    pub time_unit: TimeUnit,
    pub value: u64,
}

impl Delay {
    /// Longest delay an expectation may carry.
    pub const MAX_DURATION: Duration = Duration::from_secs(30 * 86_400);

    pub fn millis(value: u64) -> Self {
        Self {
            time_unit: TimeUnit::Milliseconds,
            value,
        }
    }

    pub fn seconds(value: u64) -> Self {
        Self {
            time_unit: TimeUnit::Seconds,
            value,
        }
    }

    pub fn to_duration(&self) -> Duration {
        self.time_unit.to_duration(self.value)
    }

    /// Sum several delays into one duration.
    ///
    /// Delays are added together rather than reduced to the longest one.
    pub fn total<'a>(delays: impl IntoIterator<Item = &'a Delay>) -> Duration {
        delays
            .into_iter()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d.to_duration()))
    }
}
