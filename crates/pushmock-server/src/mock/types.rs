//! Type definitions for stored mock documents.
//!
//! A mock document pairs an identity pattern with a recorded timeline of
//! events. Documents are stored as JSON, one per file, and validated here
//! before any scheduling happens.

use crate::matcher::QueryPolicy;
use serde::{Deserialize, Serialize};

/// A stored mock definition.
///
/// `responses` references entries of `data` by index; `validate` checks the
/// references before the definition is considered usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockDefinition {
    /// Identity pattern this mock answers (may include a query string).
    pub url: String,
    /// Optional scenario; when set, the mock only resolves for requests
    /// declaring the same scenario.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Query-matching configuration. Absent means base-URL matching only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchingConfig>,
    /// Timeline of scheduled deliveries.
    #[serde(default)]
    pub responses: Vec<TimelineEntry>,
    /// Payload pool referenced by `TimelineEntry::response`.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// One scheduled delivery within a mock's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Delay in milliseconds from stream arm time.
    pub time: u64,
    /// Index into the definition's `data` pool.
    pub response: i64,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
}

pub(crate) fn default_status_code() -> u16 {
    200
}

/// Query-matching configuration as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchingConfig {
    /// Every query key/value pair must match exactly.
    #[serde(default)]
    pub match_all_queries: bool,
    /// Only these keys must match; ignored when `match_all_queries` is set.
    #[serde(default)]
    pub match_queries: Vec<String>,
}

impl MatchingConfig {
    /// Reduce the stored flags to a single query policy.
    pub fn policy(&self) -> QueryPolicy {
        if self.match_all_queries {
            QueryPolicy::MatchAllQueries
        } else if !self.match_queries.is_empty() {
            QueryPolicy::MatchKeys(self.match_queries.clone())
        } else {
            QueryPolicy::IgnoreQuery
        }
    }
}

impl MockDefinition {
    /// The query policy this definition matches under.
    pub fn policy(&self) -> QueryPolicy {
        self.matching
            .as_ref()
            .map(MatchingConfig::policy)
            .unwrap_or_default()
    }

    /// Check the payload-reference invariant: `data` is non-empty and every
    /// timeline entry points inside it. Invalid definitions are unusable
    /// for scheduling but never fatal to the caller.
    pub fn validate(&self) -> Result<(), MockDataError> {
        if self.data.is_empty() {
            return Err(MockDataError::NoPayloads);
        }
        for (index, entry) in self.responses.iter().enumerate() {
            if entry.response < 0 || entry.response as usize >= self.data.len() {
                return Err(MockDataError::PayloadIndexOutOfRange {
                    entry: index,
                    payload_index: entry.response,
                    payload_count: self.data.len(),
                });
            }
        }
        Ok(())
    }
}

/// Why a mock document is unusable for scheduling.
#[derive(Debug, thiserror::Error)]
pub enum MockDataError {
    #[error("mock has no payloads")]
    NoPayloads,
    #[error("timeline entry {entry} references payload {payload_index} (have {payload_count})")]
    PayloadIndexOutOfRange {
        entry: usize,
        payload_index: i64,
        payload_count: usize,
    },
}
