//! Serializable event records.
//!
//! [`EventRecord`] is what leaves the process: timeline exports, JSON
//! dumps, anything a downstream tool reads. Live world handles and contact
//! point sets stay behind; records carry names and numbers only.

use crate::event::{Event, EventTag};
use crate::logger::EventLogger;
use crate::types::Color;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub kind: EventTag,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<String>,
    /// Tracked object first, then partner / agent when present.
    pub participants: Vec<String>,
    pub description: String,
    pub color: Color,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.tag(),
            timestamp: event.timestamp(),
            end_timestamp: event.end_timestamp(),
            producer_id: event.producer_id().map(str::to_string),
            participants: event.participants(),
            description: event.describe(),
            color: event.color(),
        }
    }
}

/// Whole-run export: global timeline plus per-producer counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineExport {
    pub events: Vec<EventRecord>,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSummary {
    pub producer_id: String,
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<f64>,
}

impl EventLogger {
    /// Global timeline as records.
    pub fn records(&self) -> Vec<EventRecord> {
        self.events()
            .iter()
            .map(|e| EventRecord::from(e.as_ref()))
            .collect()
    }

    pub fn export(&self) -> TimelineExport {
        let producers = self
            .events_by_producer()
            .into_iter()
            .map(|(producer_id, timeline)| ProducerSummary {
                event_count: timeline.len(),
                last_timestamp: timeline.last().map(|e| e.timestamp()),
                producer_id,
            })
            .collect();
        TimelineExport {
            events: self.records(),
            producers,
        }
    }
}
