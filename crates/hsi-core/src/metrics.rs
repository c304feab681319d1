//! Inspector metrics
//!
//! Counters are plain atomics so one collector can be shared by every
//! worker's inspector.

use crate::events::EventCode;
use crate::flow::SectionType;
use crate::inspector::Disposition;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for one inspector or a group of them
#[derive(Debug)]
pub struct InspectMetrics {
    /// When the collector was started
    start_time: Instant,
    pub chunks: AtomicU64,
    pub octets: AtomicU64,
    pub flows_created: AtomicU64,
    /// Chunks dropped unexamined in a Discard, Closed or Abort direction
    pub chunks_dropped: AtomicU64,
    pub invariant_violations: AtomicU64,
    sections: [AtomicU64; 7],
    dispositions: [AtomicU64; 3],
    events: [AtomicU64; 27],
}

impl Default for InspectMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn section_slot(kind: SectionType) -> Option<usize> {
    SectionType::SECTIONS.iter().position(|s| *s == kind)
}

fn disposition_slot(disposition: Disposition) -> usize {
    match disposition {
        Disposition::Ignore => 0,
        Disposition::Inspect => 1,
        Disposition::Abort => 2,
    }
}

impl InspectMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            chunks: AtomicU64::new(0),
            octets: AtomicU64::new(0),
            flows_created: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            sections: Default::default(),
            dispositions: Default::default(),
            events: Default::default(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_chunk(&self, octets: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.octets.fetch_add(octets as u64, Ordering::Relaxed);
    }

    pub fn record_section(&self, kind: SectionType) {
        if let Some(slot) = section_slot(kind) {
            self.sections[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        self.dispositions[disposition_slot(disposition)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self, code: EventCode) {
        if let Some(counter) = self.events.get(usize::from(code.id()) - 1) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sections(&self, kind: SectionType) -> u64 {
        section_slot(kind).map_or(0, |slot| self.sections[slot].load(Ordering::Relaxed))
    }

    pub fn dispositions(&self, disposition: Disposition) -> u64 {
        self.dispositions[disposition_slot(disposition)].load(Ordering::Relaxed)
    }

    pub fn events(&self, code: EventCode) -> u64 {
        self.events
            .get(usize::from(code.id()) - 1)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn events_total(&self) -> u64 {
        self.events.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    fn event_counts(&self) -> impl Iterator<Item = (EventCode, u64)> + '_ {
        EventCode::from_infractions(crate::events::Infractions::all())
            .map(|code| (code, self.events(code)))
            .filter(|(_, count)| *count > 0)
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP hsi_uptime_seconds Time since the inspector started\n");
        output.push_str("# TYPE hsi_uptime_seconds gauge\n");
        output.push_str(&format!("hsi_uptime_seconds {}\n\n", self.uptime_seconds()));

        output.push_str("# HELP hsi_chunks_total Chunks delivered to the inspector\n");
        output.push_str("# TYPE hsi_chunks_total counter\n");
        output.push_str(&format!(
            "hsi_chunks_total {}\n\n",
            self.chunks.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP hsi_octets_total Octets delivered to the inspector\n");
        output.push_str("# TYPE hsi_octets_total counter\n");
        output.push_str(&format!(
            "hsi_octets_total {}\n\n",
            self.octets.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP hsi_flows_total Flows with inspector state\n");
        output.push_str("# TYPE hsi_flows_total counter\n");
        output.push_str(&format!(
            "hsi_flows_total {}\n\n",
            self.flows_created.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP hsi_chunks_dropped_total Chunks dropped unexamined\n");
        output.push_str("# TYPE hsi_chunks_dropped_total counter\n");
        output.push_str(&format!(
            "hsi_chunks_dropped_total {}\n\n",
            self.chunks_dropped.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP hsi_sections_total Sections analyzed by type\n");
        output.push_str("# TYPE hsi_sections_total counter\n");
        for kind in SectionType::SECTIONS {
            output.push_str(&format!(
                "hsi_sections_total{{type=\"{}\"}} {}\n",
                kind,
                self.sections(kind)
            ));
        }
        output.push('\n');

        output.push_str("# HELP hsi_dispositions_total Chunk dispositions\n");
        output.push_str("# TYPE hsi_dispositions_total counter\n");
        for disposition in [Disposition::Inspect, Disposition::Ignore, Disposition::Abort] {
            output.push_str(&format!(
                "hsi_dispositions_total{{disposition=\"{}\"}} {}\n",
                disposition.as_str(),
                self.dispositions(disposition)
            ));
        }
        output.push('\n');

        output.push_str("# HELP hsi_events_total Anomaly events by code\n");
        output.push_str("# TYPE hsi_events_total counter\n");
        for (code, count) in self.event_counts() {
            output.push_str(&format!(
                "hsi_events_total{{code=\"{}\"}} {}\n",
                code.id(),
                count
            ));
        }
        output.push('\n');

        output.push_str("# HELP hsi_invariant_violations_total Internal errors\n");
        output.push_str("# TYPE hsi_invariant_violations_total counter\n");
        output.push_str(&format!(
            "hsi_invariant_violations_total {}\n",
            self.invariant_violations.load(Ordering::Relaxed)
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let sections: serde_json::Map<String, serde_json::Value> = SectionType::SECTIONS
            .iter()
            .map(|kind| (kind.to_string(), self.sections(*kind).into()))
            .collect();
        let events: serde_json::Map<String, serde_json::Value> = self
            .event_counts()
            .map(|(code, count)| (code.id().to_string(), count.into()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "chunks": self.chunks.load(Ordering::Relaxed),
            "octets": self.octets.load(Ordering::Relaxed),
            "flows_created": self.flows_created.load(Ordering::Relaxed),
            "chunks_dropped": self.chunks_dropped.load(Ordering::Relaxed),
            "invariant_violations": self.invariant_violations.load(Ordering::Relaxed),
            "sections": sections,
            "dispositions": {
                "inspect": self.dispositions(Disposition::Inspect),
                "ignore": self.dispositions(Disposition::Ignore),
                "abort": self.dispositions(Disposition::Abort),
            },
            "events": events,
            "events_total": self.events_total(),
        })
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<InspectMetrics>;

/// Create a new shared metrics collector
pub fn create_metrics() -> SharedMetrics {
    Arc::new(InspectMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = InspectMetrics::new();
        metrics.record_chunk(10);
        metrics.record_chunk(5);
        metrics.record_section(SectionType::Header);
        metrics.record_section(SectionType::Discard);
        metrics.record_disposition(Disposition::Inspect);
        metrics.record_event(EventCode::MultipleContentLength);
        metrics.record_event(EventCode::NotHttp);

        assert_eq!(metrics.chunks.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.octets.load(Ordering::Relaxed), 15);
        assert_eq!(metrics.sections(SectionType::Header), 1);
        assert_eq!(metrics.sections(SectionType::Discard), 0);
        assert_eq!(metrics.dispositions(Disposition::Inspect), 1);
        assert_eq!(metrics.events(EventCode::MultipleContentLength), 1);
        assert_eq!(metrics.events_total(), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = InspectMetrics::new();
        metrics.record_section(SectionType::ChunkHead);
        metrics.record_event(EventCode::BareLf);
        let text = metrics.to_prometheus();
        assert!(text.contains("hsi_sections_total{type=\"chunk_head\"} 1"));
        assert!(text.contains("hsi_events_total{code=\"9\"} 1"));
        assert!(text.contains("# TYPE hsi_chunks_total counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = InspectMetrics::new();
        metrics.record_disposition(Disposition::Abort);
        let json = metrics.to_json();
        assert_eq!(json["dispositions"]["abort"], 1);
        assert_eq!(json["sections"]["request"], 0);
    }
}
