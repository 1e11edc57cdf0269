//! Bounded log of received requests, used for retrieval and verification.

use crate::model::HttpRequest;
use crate::predicate::{RequestMatcher, RequestPattern};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub max_entries: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// A received request and the expectation that served it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedRequest {
    pub http_request: HttpRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Expected number of matching requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationTimes {
    #[serde(default)]
    pub at_least: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most: Option<u32>,
}

impl Default for VerificationTimes {
    fn default() -> Self {
        Self::at_least(1)
    }
}

impl VerificationTimes {
    pub fn at_least(count: u32) -> Self {
        Self {
            at_least: count,
            at_most: None,
        }
    }

    pub fn at_most(count: u32) -> Self {
        Self {
            at_least: 0,
            at_most: Some(count),
        }
    }

    pub fn exactly(count: u32) -> Self {
        Self {
            at_least: count,
            at_most: Some(count),
        }
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }

    pub fn never() -> Self {
        Self::exactly(0)
    }

    fn accepts(&self, count: usize) -> bool {
        count >= self.at_least as usize && self.at_most.map_or(true, |max| count <= max as usize)
    }

    fn describe(&self) -> String {
        match self.at_most {
            Some(max) if max == self.at_least => format!("exactly {max} times"),
            Some(max) if self.at_least == 0 => format!("at most {max} times"),
            Some(max) => format!("between {} and {max} times", self.at_least),
            None => format!("at least {} times", self.at_least),
        }
    }
}

/// Body of a verify call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    #[serde(default)]
    pub http_request: RequestPattern,
    #[serde(default)]
    pub times: VerificationTimes,
}

/// Body of a verify-sequence call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSequence {
    #[serde(default)]
    pub http_requests: Vec<RequestPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct VerificationFailure(pub String);

pub struct EventLog {
    max_entries: usize,
    entries: RwLock<VecDeque<LoggedRequest>>,
}

impl EventLog {
    pub fn new(config: &EventLogConfig) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn log(&self, request: HttpRequest, expectation_id: Option<String>) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(LoggedRequest {
            http_request: request,
            expectation_id,
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retrieve_logged(&self, filter: Option<&RequestMatcher>) -> Vec<LoggedRequest> {
        self.entries
            .read()
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(None, &e.http_request)))
            .cloned()
            .collect()
    }

    /// Received requests, oldest first.
    pub fn retrieve_requests(&self, filter: Option<&RequestMatcher>) -> Vec<HttpRequest> {
        self.entries
            .read()
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(None, &e.http_request)))
            .map(|e| e.http_request.clone())
            .collect()
    }

    /// Check how many received requests match.
    pub fn verify(&self, matcher: &RequestMatcher, times: VerificationTimes) -> Result<(), VerificationFailure> {
        let count = self.retrieve_requests(Some(matcher)).len();
        if times.accepts(count) {
            return Ok(());
        }
        let expected = serde_json::to_string(matcher.pattern()).unwrap_or_default();
        let received = serde_json::to_string(&self.retrieve_requests(None)).unwrap_or_default();
        debug!("Verification failed: {} matching request(s)", count);
        Err(VerificationFailure(format!(
            "Request not found {}, found {count}, expected:<{expected}> but was:<{received}>",
            times.describe()
        )))
    }

    /// Check that requests matching each matcher were received in this order.
    pub fn verify_sequence(&self, matchers: &[RequestMatcher]) -> Result<(), VerificationFailure> {
        let requests = self.retrieve_requests(None);
        let mut position = 0;
        for (index, matcher) in matchers.iter().enumerate() {
            match requests[position..]
                .iter()
                .position(|r| matcher.matches(None, r))
            {
                Some(offset) => position += offset + 1,
                None => {
                    let expected = serde_json::to_string(matcher.pattern()).unwrap_or_default();
                    return Err(VerificationFailure(format!(
                        "Request sequence not found, element {index} expected:<{expected}> was not received in order"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Remove matching entries, or all. Returns how many were removed.
    pub fn clear(&self, filter: Option<&RequestMatcher>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        match filter {
            Some(f) => entries.retain(|e| !f.matches(None, &e.http_request)),
            None => entries.clear(),
        }
        before - entries.len()
    }

    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(path: &str) -> RequestMatcher {
        RequestMatcher::compile(RequestPattern::new().with_path(path)).unwrap()
    }

    fn log_with(paths: &[&str]) -> EventLog {
        let log = EventLog::new(&EventLogConfig::default());
        for path in paths {
            log.log(HttpRequest::get(*path), None);
        }
        log
    }

    #[test]
    fn test_log_is_bounded() {
        let log = EventLog::new(&EventLogConfig { max_entries: 2 });
        log.log(HttpRequest::get("/1"), None);
        log.log(HttpRequest::get("/2"), Some("e".into()));
        log.log(HttpRequest::get("/3"), None);
        let paths: Vec<String> = log.retrieve_requests(None).into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/2", "/3"]);
        assert_eq!(log.retrieve_logged(None)[0].expectation_id.as_deref(), Some("e"));
    }

    #[test]
    fn test_verify_counts() {
        let log = log_with(&["/a", "/b", "/a"]);
        assert!(log.verify(&matcher("/a"), VerificationTimes::exactly(2)).is_ok());
        assert!(log.verify(&matcher("/a"), VerificationTimes::at_least(1)).is_ok());
        assert!(log.verify(&matcher("/a"), VerificationTimes::at_most(1)).is_err());
        assert!(log.verify(&matcher("/c"), VerificationTimes::never()).is_ok());

        let err = log.verify(&matcher("/c"), VerificationTimes::once()).unwrap_err();
        assert!(err.0.contains("exactly 1 times"));
    }

    #[test]
    fn test_verify_sequence() {
        let log = log_with(&["/a", "/b", "/c"]);
        assert!(log.verify_sequence(&[matcher("/a"), matcher("/c")]).is_ok());
        assert!(log.verify_sequence(&[matcher("/c"), matcher("/a")]).is_err());
        assert!(log.verify_sequence(&[matcher("/a"), matcher("/a")]).is_err());
        assert!(log.verify_sequence(&[]).is_ok());
    }

    #[test]
    fn test_clear_and_reset() {
        let log = log_with(&["/a", "/b", "/a"]);
        assert_eq!(log.clear(Some(&matcher("/a"))), 2);
        assert_eq!(log.len(), 1);
        log.reset();
        assert!(log.is_empty());
    }
}
