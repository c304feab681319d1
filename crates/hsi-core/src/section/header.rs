//! Header block and the body framing decision

use super::{parse_head, HeadBlock, SectionCommon, SectionHooks};
use crate::buffers::{BufferId, DetectionBuffers};
use crate::config::InspectSettings;
use crate::events::Infractions;
use crate::flow::{FlowData, SectionType, SourceId};
use crate::inspector::Disposition;
use crate::normalize::{ContentLength, HeaderId, NormalizedHeaders};
use crate::transaction::{RequestSummary, StatusSummary};
use std::io::{self, Write};
use tracing::{debug, trace};

#[derive(Debug)]
pub struct HeaderSection<'a> {
    common: SectionCommon<'a>,
    head: HeadBlock<'a>,
    norm: NormalizedHeaders,
    /// Client side: the request these headers belong to
    request: Option<RequestSummary>,
    /// Server side: the status line these headers follow
    status: Option<StatusSummary>,
    /// Server side: the paired request used HEAD
    request_is_head: bool,
}

impl<'a> HeaderSection<'a> {
    pub(crate) fn new(common: SectionCommon<'a>) -> Self {
        Self {
            common,
            head: HeadBlock::default(),
            norm: NormalizedHeaders::default(),
            request: None,
            status: None,
            request_is_head: false,
        }
    }

    pub fn head(&self) -> &HeadBlock<'a> {
        &self.head
    }

    pub fn normalized(&self) -> &NormalizedHeaders {
        &self.norm
    }

    fn status_code(&self) -> Option<u16> {
        self.status.as_ref().and_then(|s| s.code)
    }

    /// 1xx, 204 and 304 responses end at the header block
    fn status_forbids_body(&self) -> bool {
        matches!(self.status_code(), Some(code) if code <= 199 || code == 204 || code == 304)
    }
}

impl<'a> SectionHooks<'a> for HeaderSection<'a> {
    fn common(&self) -> &SectionCommon<'a> {
        &self.common
    }

    fn analyze(&mut self, flow: &FlowData, settings: &InspectSettings) {
        self.head = parse_head(self.common.raw, settings.max_headers);
        self.common.set_consumed(self.head.consumed);
        self.common.infract(self.head.infractions);

        self.norm = NormalizedHeaders::from_lines(&self.head.lines);
        self.common.infract(self.norm.framing_infractions());

        match self.common.source {
            SourceId::Client => {
                self.request = flow.transactions.current_request().cloned();
            }
            SourceId::Server => {
                if let Some(transaction) = flow.transactions.response() {
                    self.status = transaction.status.clone();
                    self.request_is_head = transaction.is_head();
                }
                // 304 may legitimately repeat the length of the resource
                let code = self.status_code();
                let no_body = matches!(code, Some(code) if code <= 199 || code == 204);
                let declares_body = self.norm.count(HeaderId::TransferEncoding) > 0
                    || matches!(self.norm.content_length(), ContentLength::Valid(len) if len > 0);
                if no_body && declares_body {
                    self.common.infract(Infractions::BODY_ON_NO_BODY_RESPONSE);
                }
            }
        }
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        if source == SourceId::Client {
            if let Some(request) = flow.transactions.current_request_mut() {
                request.host = self.norm.value(HeaderId::Host).map(<[u8]>::to_vec);
            }
        }

        if self.common.at_close() {
            trace!(%source, "Transport closed after headers");
            flow.finish_message(source, SectionType::Closed);
            return;
        }
        if self.common.infractions.is_disaster() {
            debug!(
                %source,
                infractions = self.common.infractions.bits(),
                "Message framing is unrecoverable, aborting flow"
            );
            flow.finish_message(source, SectionType::Abort);
            flow.transactions.clear();
            return;
        }
        if source == SourceId::Server && (self.status_forbids_body() || self.request_is_head) {
            flow.finish_message(source, SectionType::Status);
            flow.transactions.complete_response();
            return;
        }
        if self.norm.is_chunked() {
            let state = &mut flow[source];
            state.expected = SectionType::ChunkHead;
            state.body_octets = 0;
            state.num_chunks = 0;
            return;
        }
        if let ContentLength::Valid(length) = self.norm.content_length() {
            if length > 0 {
                let state = &mut flow[source];
                state.expected = SectionType::Body;
                state.data_length = length;
                state.body_octets = 0;
                return;
            }
        }

        flow.finish_message(source, source.start_section());
        if source == SourceId::Server {
            flow.transactions.complete_response();
        }
    }

    fn worth_detection(&self) -> Disposition {
        Disposition::Inspect
    }

    /// A header block starts a new message; nothing from an earlier message
    /// in the same chunk may remain in the slots
    fn legacy_clients(&self, buffers: &mut DetectionBuffers) {
        buffers.clear();
        buffers.set_field(BufferId::Header, self.head.block);
        match self.common.source {
            SourceId::Client => {
                if let Some(request) = &self.request {
                    buffers.set(BufferId::Uri, &request.uri);
                    buffers.set(BufferId::Version, request.version.to_string().as_bytes());
                    if let Some(method) = request.method.as_str() {
                        buffers.set(BufferId::Method, method.as_bytes());
                    }
                }
                if let Some(cookie) = self.norm.value(HeaderId::Cookie) {
                    buffers.set(BufferId::Cookie, cookie);
                }
            }
            SourceId::Server => {
                if let Some(status) = &self.status {
                    if let Some(code) = status.code {
                        buffers.set(BufferId::StatusCode, code.to_string().as_bytes());
                    }
                    buffers.set(BufferId::StatusMessage, &status.reason);
                    buffers.set(BufferId::Version, status.version.to_string().as_bytes());
                }
                if let Some(cookie) = self.norm.value(HeaderId::SetCookie) {
                    buffers.set(BufferId::Cookie, cookie);
                }
            }
        }
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.head.block.print(out, "Header block", false)?;
        for (k, line) in self.head.lines.iter().enumerate() {
            line.name.print(out, &format!("Header name {}", k), false)?;
            line.value.print(out, &format!("Header value {}", k), false)?;
        }
        writeln!(
            out,
            "Header count: {}, Content-Length: {:?}, Chunked: {}",
            self.head.lines.len(),
            self.norm.content_length(),
            self.norm.is_chunked()
        )
    }
}
