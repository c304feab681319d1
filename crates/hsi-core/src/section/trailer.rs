//! Trailer fields after the last chunk

use super::{parse_head, HeadBlock, SectionCommon, SectionHooks};
use crate::buffers::{BufferId, DetectionBuffers};
use crate::config::InspectSettings;
use crate::flow::{FlowData, SourceId};
use crate::inspector::Disposition;
use std::io::{self, Write};
use tracing::trace;

#[derive(Debug)]
pub struct TrailerSection<'a> {
    common: SectionCommon<'a>,
    head: HeadBlock<'a>,
}

impl<'a> TrailerSection<'a> {
    pub(crate) fn new(common: SectionCommon<'a>) -> Self {
        Self {
            common,
            head: HeadBlock::default(),
        }
    }

    pub fn head(&self) -> &HeadBlock<'a> {
        &self.head
    }
}

impl<'a> SectionHooks<'a> for TrailerSection<'a> {
    fn common(&self) -> &SectionCommon<'a> {
        &self.common
    }

    fn analyze(&mut self, _flow: &FlowData, settings: &InspectSettings) {
        self.head = parse_head(self.common.raw, settings.max_headers);
        self.common.set_consumed(self.head.consumed);
        self.common.infract(self.head.infractions);
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        trace!(%source, chunks = flow[source].num_chunks, "Chunked message complete");
        flow.finish_message(source, source.start_section());
        if source == SourceId::Server {
            flow.transactions.complete_response();
        }
    }

    fn worth_detection(&self) -> Disposition {
        if self.head.lines.is_empty() {
            Disposition::Ignore
        } else {
            Disposition::Inspect
        }
    }

    fn legacy_clients(&self, buffers: &mut DetectionBuffers) {
        buffers.set_field(BufferId::Header, self.head.block);
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.head.block.print(out, "Trailer block", false)?;
        for (k, line) in self.head.lines.iter().enumerate() {
            line.name.print(out, &format!("Trailer name {}", k), false)?;
            line.value.print(out, &format!("Trailer value {}", k), false)?;
        }
        writeln!(out, "Trailer count: {}", self.head.lines.len())
    }
}
