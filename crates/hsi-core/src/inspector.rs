//! Inspector entry point
//!
//! The stream reassembler hands over one chunk at a time, tagged with its
//! direction. The inspector finds the flow's [`FlowData`] in the session
//! store, carves the chunk into message sections and runs each one.

use crate::buffers::{DetectionBuffers, InspectionBufferType};
use crate::config::InspectSettings;
use crate::error::{InspectError, InspectResult};
use crate::events::AnomalyEvent;
use crate::flow::{FlowData, SectionType, SourceId};
use crate::metrics::{create_metrics, SharedMetrics};
use crate::section::{MessageSection, SectionContext};
use crate::test_io::TestOutput;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use tracing::{debug, trace, warn};

/// What the detection engine should do with a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Disposition {
    /// Nothing worth matching
    Ignore,
    /// Detection buffers were filled
    Inspect,
    /// Framing is lost; stop inspecting the flow
    Abort,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Ignore => "ignore",
            Disposition::Inspect => "inspect",
            Disposition::Abort => "abort",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunk bytes, either handed over or lent by the reassembler
#[derive(Debug)]
pub enum SectionBuffer<'b> {
    /// Released when processing of the chunk ends
    Owned(Box<[u8]>),
    /// Never released by the inspector
    Borrowed(&'b [u8]),
}

impl SectionBuffer<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SectionBuffer::Owned(bytes) => bytes,
            SectionBuffer::Borrowed(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, SectionBuffer::Owned(_))
    }
}

impl From<Vec<u8>> for SectionBuffer<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        SectionBuffer::Owned(bytes.into_boxed_slice())
    }
}

impl<'b> From<&'b [u8]> for SectionBuffer<'b> {
    fn from(bytes: &'b [u8]) -> Self {
        SectionBuffer::Borrowed(bytes)
    }
}

/// One delivery from the stream reassembler
#[derive(Debug)]
pub struct Chunk<'b> {
    pub source: SourceId,
    pub buffer: SectionBuffer<'b>,
    /// The transport closed after these bytes
    pub end_of_stream: bool,
}

impl<'b> Chunk<'b> {
    pub fn new(source: SourceId, buffer: impl Into<SectionBuffer<'b>>) -> Self {
        Self {
            source,
            buffer: buffer.into(),
            end_of_stream: false,
        }
    }

    pub fn closing(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}

/// Key of an application data slot in a session
pub type InspectorId = u32;

/// Slot the HTTP inspector keeps its [`FlowData`] in
pub const HTTP_INSPECTOR_ID: InspectorId = 80;

/// Per-flow storage owned by the flow table
pub trait FlowSession {
    fn app_data_mut(&mut self, id: InspectorId) -> Option<&mut (dyn Any + Send + 'static)>;

    fn set_app_data(&mut self, id: InspectorId, data: Box<dyn Any + Send>);
}

/// A plain in-memory [`FlowSession`]
#[derive(Debug, Default)]
pub struct Session {
    slots: HashMap<InspectorId, Box<dyn Any + Send>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowSession for Session {
    fn app_data_mut(&mut self, id: InspectorId) -> Option<&mut (dyn Any + Send + 'static)> {
        self.slots.get_mut(&id).map(|data| &mut **data)
    }

    fn set_app_data(&mut self, id: InspectorId, data: Box<dyn Any + Send>) {
        self.slots.insert(id, data);
    }
}

/// Finds the flow's state, creating it on first data
fn flow_data<'s>(
    session: &'s mut dyn FlowSession,
    settings: &InspectSettings,
    metrics: &SharedMetrics,
) -> InspectResult<&'s mut FlowData> {
    if session.app_data_mut(HTTP_INSPECTOR_ID).is_none() {
        trace!("Creating flow data");
        metrics.flows_created.fetch_add(1, Ordering::Relaxed);
        session.set_app_data(
            HTTP_INSPECTOR_ID,
            Box::new(FlowData::new(settings.max_pipeline_depth)),
        );
    }
    session
        .app_data_mut(HTTP_INSPECTOR_ID)
        .and_then(|data| data.downcast_mut::<FlowData>())
        .ok_or(InspectError::FlowDataMismatch)
}

/// The HTTP inspector
///
/// One instance serves many flows; all per-flow state lives in the
/// sessions passed to [`Inspector::process`].
#[derive(Debug)]
pub struct Inspector {
    settings: InspectSettings,
    metrics: SharedMetrics,
    buffers: DetectionBuffers,
    events: Vec<AnomalyEvent>,
    recorder: Option<TestOutput>,
}

impl Inspector {
    pub fn new(settings: InspectSettings) -> Self {
        Self {
            settings,
            metrics: create_metrics(),
            buffers: DetectionBuffers::default(),
            events: Vec::new(),
            recorder: None,
        }
    }

    /// Shares a metrics collector with other inspectors
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Renders every analyzed section into `recorder`
    pub fn with_test_output(mut self, recorder: TestOutput) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn settings(&self) -> &InspectSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn recorder_mut(&mut self) -> Option<&mut TestOutput> {
        self.recorder.as_mut()
    }

    /// Detection buffers filled by the last `process` call
    pub fn buffers(&self) -> &DetectionBuffers {
        &self.buffers
    }

    pub fn get_buf(&self, kind: InspectionBufferType) -> Option<&[u8]> {
        self.buffers.get_buf(kind)
    }

    /// Events raised since the last call to [`Inspector::take_events`]
    pub fn events(&self) -> &[AnomalyEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<AnomalyEvent> {
        std::mem::take(&mut self.events)
    }

    /// The flow's parsing state, created if the flow is new
    pub fn flow_data<'s>(&self, session: &'s mut dyn FlowSession) -> InspectResult<&'s mut FlowData> {
        flow_data(session, &self.settings, &self.metrics)
    }

    /// Processes one chunk of a flow
    pub fn process(
        &mut self,
        chunk: Chunk<'_>,
        session: &mut dyn FlowSession,
    ) -> InspectResult<Disposition> {
        let Chunk {
            source,
            buffer,
            end_of_stream,
        } = chunk;
        self.metrics.record_chunk(buffer.len());
        self.buffers.clear();

        let flow = match flow_data(session, &self.settings, &self.metrics) {
            Ok(flow) => flow,
            Err(err) => {
                self.metrics.invariant_violations.fetch_add(1, Ordering::Relaxed);
                warn!(%err, %source, "Cannot use flow data");
                return Err(err);
            }
        };

        let expected = flow.expected(source);
        if expected.is_terminal() {
            let disposition = match expected {
                SectionType::Abort => Disposition::Abort,
                _ => Disposition::Ignore,
            };
            trace!(
                %source,
                state = %expected,
                octets = buffer.len(),
                owned = buffer.is_owned(),
                "Dropping chunk"
            );
            drop(buffer);
            self.metrics.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_disposition(disposition);
            return Ok(disposition);
        }

        let bytes = buffer.as_bytes();
        let events_before = self.events.len();
        let mut disposition = Disposition::Ignore;
        let mut offset = 0;

        while offset < bytes.len() {
            let expected = flow.expected(source);
            if expected.is_terminal() {
                debug!(
                    %source,
                    state = %expected,
                    remaining = bytes.len() - offset,
                    "Dropping rest of chunk"
                );
                break;
            }

            let mut section =
                match MessageSection::new(expected, &bytes[offset..], source, end_of_stream, flow) {
                    Ok(section) => section,
                    Err(err) => {
                        self.metrics.invariant_violations.fetch_add(1, Ordering::Relaxed);
                        warn!(%err, %source, "Cannot build section");
                        return Err(err);
                    }
                };

            let mut ctx = SectionContext {
                flow: &mut *flow,
                settings: &self.settings,
                events: &mut self.events,
                buffers: &mut self.buffers,
            };
            let section_disposition = section.run(&mut ctx);
            self.metrics.record_section(section.section_type());
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.record(&section)?;
            }
            disposition = disposition.max(section_disposition);

            let consumed = section.consumed();
            if consumed == 0 {
                self.metrics.invariant_violations.fetch_add(1, Ordering::Relaxed);
                return Err(InspectError::InvariantViolation(format!(
                    "{} section consumed no octets",
                    section.section_type()
                )));
            }
            offset += consumed;
        }

        if end_of_stream && !flow.expected(source).is_terminal() {
            trace!(%source, "Transport closed");
            flow.finish_message(source, SectionType::Closed);
        }

        for event in &self.events[events_before..] {
            self.metrics.record_event(event.code);
        }
        self.metrics.record_disposition(disposition);
        Ok(disposition)
    }
}
