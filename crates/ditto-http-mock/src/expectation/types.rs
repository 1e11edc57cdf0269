//! Expectation definitions: the request pattern, its action and lifetime limits.

use crate::model::{Action, HttpResponse, TimeUnit};
use crate::predicate::RequestPattern;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Where an expectation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cause {
    #[default]
    Api,
    FileInitialiser,
    ClassInitialiser,
}

/// Remaining-match budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Times {
    #[serde(default)]
    pub remaining_times: u32,
    #[serde(default)]
    pub unlimited: bool,
}

impl Default for Times {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Times {
    pub fn unlimited() -> Self {
        Self {
            remaining_times: 0,
            unlimited: true,
        }
    }

    pub fn exactly(count: u32) -> Self {
        Self {
            remaining_times: count,
            unlimited: false,
        }
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Absolute expiry of an expectation.
///
/// A relative `timeUnit`/`timeToLive` pair is resolved to `endEpochMillis`
/// when the definition is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TimeToLiveRaw", into = "TimeToLiveRaw")]
pub struct TimeToLive {
    pub end_epoch_millis: Option<i64>,
}

impl Default for TimeToLive {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl TimeToLive {
    pub fn unlimited() -> Self {
        Self {
            end_epoch_millis: None,
        }
    }

    pub fn exactly(ttl: Duration) -> Self {
        Self {
            end_epoch_millis: Some(
                now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            ),
        }
    }

    pub fn until(end_epoch_millis: i64) -> Self {
        Self {
            end_epoch_millis: Some(end_epoch_millis),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.end_epoch_millis.is_none()
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.end_epoch_millis.is_some_and(|end| now_millis > end)
    }

    pub fn still_alive(&self) -> bool {
        !self.is_expired_at(now_millis())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeToLiveRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_unit: Option<TimeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_to_live: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_epoch_millis: Option<i64>,
    #[serde(default)]
    unlimited: Option<bool>,
}

impl From<TimeToLiveRaw> for TimeToLive {
    fn from(raw: TimeToLiveRaw) -> Self {
        if raw.unlimited == Some(true) {
            return TimeToLive::unlimited();
        }
        if let Some(end) = raw.end_epoch_millis {
            return TimeToLive::until(end);
        }
        match raw.time_to_live {
            Some(value) => TimeToLive::exactly(raw.time_unit.unwrap_or_default().to_duration(value)),
            None => TimeToLive::unlimited(),
        }
    }
}

impl From<TimeToLive> for TimeToLiveRaw {
    fn from(ttl: TimeToLive) -> Self {
        TimeToLiveRaw {
            end_epoch_millis: ttl.end_epoch_millis,
            unlimited: Some(ttl.is_unlimited()),
            ..TimeToLiveRaw::default()
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A stored rule: when a request matches `http_request`, perform `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    #[serde(default = "new_id")]
    pub id: String,

    /// Higher values are matched first
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub http_request: RequestPattern,

    #[serde(flatten)]
    pub action: Action,

    #[serde(default)]
    pub times: Times,

    #[serde(default)]
    pub time_to_live: TimeToLive,

    #[serde(skip)]
    pub source: Cause,
}

impl Expectation {
    pub fn new(http_request: RequestPattern, action: Action) -> Self {
        Self {
            id: new_id(),
            priority: 0,
            http_request,
            action,
            times: Times::unlimited(),
            time_to_live: TimeToLive::unlimited(),
            source: Cause::Api,
        }
    }

    /// Shorthand for an expectation answering with a fixed response.
    pub fn respond(http_request: RequestPattern, response: HttpResponse) -> Self {
        Self::new(http_request, Action::Respond(response))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    pub fn with_time_to_live(mut self, time_to_live: TimeToLive) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    pub fn with_source(mut self, source: Cause) -> Self {
        self.source = source;
        self
    }
}

/// Parse a single expectation or an array of them.
pub fn parse_expectations(json: &str) -> serde_json::Result<Vec<Expectation>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}
