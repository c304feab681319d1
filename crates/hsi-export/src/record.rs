//! Exported form of an anomaly event

use chrono::{DateTime, Utc};
use hsi_core::events::{AnomalyEvent, EventCode};
use hsi_core::flow::{SectionType, SourceId};
use serde::{Deserialize, Serialize};

/// One anomaly event with the context needed to find it again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique record identifier (ULID)
    pub event_id: String,

    pub ts: DateTime<Utc>,

    /// Flow the event was raised on, as the sensor names it
    pub flow: String,

    /// Test case number when replaying recorded traffic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<i64>,

    pub source: SourceId,
    pub section: SectionType,
    pub code: EventCode,

    /// Numeric event id as rules reference it
    pub event: u16,

    pub description: String,
}

impl EventRecord {
    pub fn new(flow: impl Into<String>, event: &AnomalyEvent) -> Self {
        Self {
            event_id: ulid::Ulid::new().to_string(),
            ts: Utc::now(),
            flow: flow.into(),
            test: None,
            source: event.source,
            section: event.section,
            code: event.code,
            event: event.code.id(),
            description: event.code.description().to_string(),
        }
    }

    pub fn with_test(mut self, test: Option<i64>) -> Self {
        self.test = test;
        self
    }
}
