//! Bounded request log.

use crate::matcher::MatchFailure;
use crate::request::{RequestContext, State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Result of evaluating one expectation against a request.
#[derive(Debug, Clone, Serialize)]
pub struct ExpectationOutcome {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub matched: bool,
    /// First matcher that rejected the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<MatchFailure>,
}

/// One request as seen by one manager.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub received_at: DateTime<Utc>,
    pub request: RequestContext,
    pub state_before: State,
    pub outcomes: Vec<ExpectationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<usize>,
    /// Whether the verify matchers accepted the response; `None` without a match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// Set when a response function or hook failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state_after: State,
}

/// Ring buffer of log entries; the oldest entry is evicted when full.
#[derive(Debug, Clone)]
pub struct RequestLog {
    entries: VecDeque<RequestLogEntry>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: RequestLogEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &RequestLogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&RequestLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<RequestLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> RequestLogEntry {
        RequestLogEntry {
            received_at: Utc::now(),
            request: RequestContext::new("GET", path),
            state_before: State::new(),
            outcomes: Vec::new(),
            selected: None,
            verified: None,
            error: None,
            state_after: State::new(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut log = RequestLog::new(2);
        log.push(entry("/a"));
        log.push(entry("/b"));
        log.push(entry("/c"));

        let paths: Vec<_> = log.entries().map(|e| e.request.path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
        assert_eq!(log.last().map(|e| e.request.path.as_str()), Some("/c"));
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut log = RequestLog::new(0);
        log.push(entry("/a"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_serializes() {
        let mut e = entry("/a?x=1");
        e.outcomes.push(ExpectationOutcome {
            index: 0,
            id: None,
            matched: false,
            reason: Some(MatchFailure {
                kind: "path",
                expected: "/b".to_string(),
                actual: "/a".to_string(),
            }),
        });

        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["request"]["path"], "/a");
        assert_eq!(json["outcomes"][0]["reason"]["kind"], "path");
        assert!(json.get("selected").is_none());
    }
}
