//! Message body and chunk data

use super::{SectionCommon, SectionHooks};
use crate::buffers::{BufferId, DetectionBuffers};
use crate::config::InspectSettings;
use crate::error::{InspectError, InspectResult};
use crate::events::Infractions;
use crate::field::Field;
use crate::flow::{FlowData, SectionType, SourceId};
use crate::inspector::Disposition;
use std::io::{self, Write};
use tracing::trace;

/// Body octets framed by Content-Length, or the data of one chunk
#[derive(Debug)]
pub struct BodySection<'a> {
    common: SectionCommon<'a>,
    chunked: bool,
    /// Octets still owed when the section started
    outstanding: u64,
    data: Field<'a>,
}

impl<'a> BodySection<'a> {
    pub(crate) fn new(
        common: SectionCommon<'a>,
        flow: &FlowData,
        chunked: bool,
    ) -> InspectResult<Self> {
        let kind = if chunked {
            SectionType::ChunkBody
        } else {
            SectionType::Body
        };
        let outstanding = flow[common.source]
            .remaining()
            .filter(|&r| r > 0)
            .ok_or_else(|| {
                InspectError::InvariantViolation(format!(
                    "{} expected on {} side with no outstanding length",
                    kind, common.source
                ))
            })?;
        Ok(Self {
            common,
            chunked,
            outstanding,
            data: Field::not_computed(),
        })
    }

    pub fn data(&self) -> Field<'a> {
        self.data
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
}

impl<'a> SectionHooks<'a> for BodySection<'a> {
    fn common(&self) -> &SectionCommon<'a> {
        &self.common
    }

    fn analyze(&mut self, _flow: &FlowData, _settings: &InspectSettings) {
        let raw = self.common.raw;
        let take = usize::try_from(self.outstanding).map_or(raw.len(), |r| r.min(raw.len()));
        self.data = Field::new(&raw[..take]);
        let mut consumed = take;

        if self.chunked && take as u64 == self.outstanding {
            // Chunk data is followed by CRLF, which may also arrive with the
            // next chunk head
            let rest = &raw[take..];
            if rest.starts_with(b"\r\n") {
                consumed += 2;
            } else if rest.starts_with(b"\n") {
                self.common.infract(Infractions::BARE_LF);
                consumed += 1;
            } else if rest == b"\r" {
                consumed += 1;
            } else if !rest.is_empty() {
                self.common.infract(Infractions::CHUNK_TERMINATOR_MISSING);
            }
        }
        self.common.set_consumed(consumed);
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        let octets = self.data.bytes().map_or(0, |d| d.len() as u64);
        let state = &mut flow[source];
        state.body_octets += octets;
        let done = state.remaining() == Some(0);

        if done {
            if self.chunked {
                state.expected = SectionType::ChunkHead;
            } else {
                trace!(%source, octets = state.body_octets, "Body complete");
                flow.finish_message(source, source.start_section());
                if source == SourceId::Server {
                    flow.transactions.complete_response();
                }
            }
        } else if self.common.at_close() {
            self.common.infract(Infractions::BODY_TRUNCATED);
            flow.finish_message(source, SectionType::Closed);
        }
    }

    fn worth_detection(&self) -> Disposition {
        if self.data.has_data() {
            Disposition::Inspect
        } else {
            Disposition::Ignore
        }
    }

    fn legacy_clients(&self, buffers: &mut DetectionBuffers) {
        buffers.set_field(BufferId::Body, self.data);
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.data.print(out, "Body data", false)?;
        writeln!(out, "Outstanding octets: {}", self.outstanding)
    }
}
