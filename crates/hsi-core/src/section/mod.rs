//! Message sections
//!
//! A delivered chunk is carved into sections. Each [`MessageSection`] is one
//! variant of a closed set and runs the same pipeline over its hooks:
//!
//! ```text
//! analyze -> update_flow -> gen_events -> worth_detection -> legacy_clients
//! ```
//!
//! Sections borrow the chunk for the duration of one `process` call and
//! never outlive it. Anything later sections need is copied into the
//! flow's transaction queue.

mod body;
mod chunk;
mod head;
mod header;
mod request;
mod status;
mod trailer;

pub use body::BodySection;
pub use chunk::ChunkHeadSection;
pub use head::{parse_head, HeadBlock};
pub use header::HeaderSection;
pub use request::RequestSection;
pub use status::StatusSection;
pub use trailer::TrailerSection;

use crate::buffers::DetectionBuffers;
use crate::config::InspectSettings;
use crate::error::{InspectError, InspectResult};
use crate::events::{AnomalyEvent, EventCode, EventSink, Infractions};
use crate::field::Field;
use crate::flow::{FlowData, SectionType, SourceId};
use crate::inspector::Disposition;
use std::fmt;
use std::io::{self, Write};
use tracing::{debug, trace};

/// Request methods the inspector distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodId {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// A valid token that is not a registered method
    Other,
}

impl MethodId {
    /// Classifies a method token. Returns `None` if it is not a valid token.
    pub fn classify(raw: &[u8]) -> Option<Self> {
        let method = http::Method::from_bytes(raw).ok()?;
        Some(match method.as_str() {
            "GET" => MethodId::Get,
            "HEAD" => MethodId::Head,
            "POST" => MethodId::Post,
            "PUT" => MethodId::Put,
            "DELETE" => MethodId::Delete,
            "CONNECT" => MethodId::Connect,
            "OPTIONS" => MethodId::Options,
            "TRACE" => MethodId::Trace,
            "PATCH" => MethodId::Patch,
            _ => MethodId::Other,
        })
    }

    /// Canonical name of a registered method
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            MethodId::Get => Some("GET"),
            MethodId::Head => Some("HEAD"),
            MethodId::Post => Some("POST"),
            MethodId::Put => Some("PUT"),
            MethodId::Delete => Some("DELETE"),
            MethodId::Connect => Some("CONNECT"),
            MethodId::Options => Some("OPTIONS"),
            MethodId::Trace => Some("TRACE"),
            MethodId::Patch => Some("PATCH"),
            MethodId::Other => None,
        }
    }
}

/// Protocol version named in a start line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    Http10,
    Http11,
    /// Well formed `HTTP/d.d` with other numbers
    Other,
    /// Missing or malformed
    Invalid,
}

impl HttpVersion {
    pub fn parse(raw: &[u8]) -> Self {
        match raw {
            b"HTTP/1.1" => HttpVersion::Http11,
            b"HTTP/1.0" => HttpVersion::Http10,
            [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
                if major.is_ascii_digit() && minor.is_ascii_digit() =>
            {
                HttpVersion::Other
            }
            _ => HttpVersion::Invalid,
        }
    }

    pub fn infractions(self) -> Infractions {
        match self {
            HttpVersion::Http10 | HttpVersion::Http11 => Infractions::empty(),
            HttpVersion::Other => Infractions::UNSUPPORTED_VERSION,
            HttpVersion::Invalid => Infractions::BAD_VERSION,
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
            HttpVersion::Other => "other",
            HttpVersion::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// A line located in a section buffer
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line {
    pub start: usize,
    /// End of the line content, before any CR LF
    pub content_end: usize,
    /// Offset just past the terminator
    pub end: usize,
    pub bare_lf: bool,
}

impl Line {
    pub fn content<'a>(&self, raw: &'a [u8]) -> &'a [u8] {
        &raw[self.start..self.content_end]
    }
}

/// Finds the line starting at `start`. A line without a terminator runs to
/// the end of the buffer.
pub(crate) fn next_line(raw: &[u8], start: usize) -> Line {
    match raw[start..].iter().position(|&b| b == b'\n') {
        Some(offset) => {
            let lf = start + offset;
            let cr = lf > start && raw[lf - 1] == b'\r';
            Line {
                start,
                content_end: if cr { lf - 1 } else { lf },
                end: lf + 1,
                bare_lf: !cr,
            }
        }
        None => Line {
            start,
            content_end: raw.len(),
            end: raw.len(),
            bare_lf: false,
        },
    }
}

/// Number of CR and LF octets at the front of `raw`
pub(crate) fn leading_crlf(raw: &[u8]) -> usize {
    raw.iter()
        .position(|&b| b != b'\r' && b != b'\n')
        .unwrap_or(raw.len())
}

/// Attributes every section variant shares
#[derive(Debug, Clone)]
pub struct SectionCommon<'a> {
    /// Octets available to this section: the rest of the delivered chunk
    raw: &'a [u8],
    /// Octets the section claimed during analyze
    consumed: usize,
    source: SourceId,
    /// The transport closed after the delivered chunk
    close: bool,
    infractions: Infractions,
}

impl<'a> SectionCommon<'a> {
    pub(crate) fn new(raw: &'a [u8], source: SourceId, close: bool) -> Self {
        Self {
            raw,
            consumed: 0,
            source,
            close,
            infractions: Infractions::empty(),
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub(crate) fn set_consumed(&mut self, consumed: usize) {
        self.consumed = consumed.min(self.raw.len());
    }

    /// Octets this section claimed
    pub fn section_bytes(&self) -> &'a [u8] {
        &self.raw[..self.consumed]
    }

    pub fn infractions(&self) -> Infractions {
        self.infractions
    }

    pub(crate) fn infract(&mut self, infractions: Infractions) {
        self.infractions |= infractions;
    }

    pub(crate) fn replace_infractions(&mut self, infractions: Infractions) {
        self.infractions = infractions;
    }

    /// True when the transport closed right after this section
    pub fn at_close(&self) -> bool {
        self.close && self.consumed == self.raw.len()
    }
}

/// Hooks each section variant supplies to the shared pipeline
pub(crate) trait SectionHooks<'a> {
    fn common(&self) -> &SectionCommon<'a>;

    /// Parses raw bytes into fields and records infractions. Must set the
    /// number of octets consumed.
    fn analyze(&mut self, flow: &FlowData, settings: &InspectSettings);

    /// Decides what the next section in this direction will be
    fn update_flow(&mut self, flow: &mut FlowData);

    fn gen_events(&self, section: SectionType, sink: &mut dyn EventSink) {
        let common = self.common();
        for code in EventCode::from_infractions(common.infractions) {
            trace!(%code, source = %common.source, %section, "Anomaly");
            sink.emit(AnomalyEvent {
                code,
                source: common.source,
                section,
            });
        }
    }

    fn worth_detection(&self) -> Disposition;

    /// Fills the named detection buffers from this section's fields
    fn legacy_clients(&self, _buffers: &mut DetectionBuffers) {}

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Everything the pipeline reads and writes besides the section itself
pub struct SectionContext<'c> {
    pub flow: &'c mut FlowData,
    pub settings: &'c InspectSettings,
    pub events: &'c mut dyn EventSink,
    pub buffers: &'c mut DetectionBuffers,
}

/// One section of an HTTP message
#[derive(Debug)]
pub enum MessageSection<'a> {
    Request(RequestSection<'a>),
    Status(StatusSection<'a>),
    Header(HeaderSection<'a>),
    Body(BodySection<'a>),
    ChunkHead(ChunkHeadSection<'a>),
    ChunkBody(BodySection<'a>),
    Trailer(TrailerSection<'a>),
}

impl<'a> MessageSection<'a> {
    /// Builds the section the flow expects next in `source`'s direction.
    ///
    /// Fails when `kind` is not a section type, or a body section is
    /// expected without an outstanding length.
    pub fn new(
        kind: SectionType,
        raw: &'a [u8],
        source: SourceId,
        close: bool,
        flow: &FlowData,
    ) -> InspectResult<Self> {
        let common = SectionCommon::new(raw, source, close);
        let section = match kind {
            SectionType::Request => MessageSection::Request(RequestSection::new(common)),
            SectionType::Status => MessageSection::Status(StatusSection::new(common)),
            SectionType::Header => MessageSection::Header(HeaderSection::new(common)),
            SectionType::Body => MessageSection::Body(BodySection::new(common, flow, false)?),
            SectionType::ChunkHead => MessageSection::ChunkHead(ChunkHeadSection::new(common)),
            SectionType::ChunkBody => {
                MessageSection::ChunkBody(BodySection::new(common, flow, true)?)
            }
            SectionType::Trailer => MessageSection::Trailer(TrailerSection::new(common)),
            SectionType::Discard | SectionType::Closed | SectionType::Abort => {
                return Err(InspectError::InvariantViolation(format!(
                    "no message section for {} state",
                    kind
                )));
            }
        };
        Ok(section)
    }

    fn hooks(&self) -> &dyn SectionHooks<'a> {
        match self {
            MessageSection::Request(s) => s,
            MessageSection::Status(s) => s,
            MessageSection::Header(s) => s,
            MessageSection::Body(s) | MessageSection::ChunkBody(s) => s,
            MessageSection::ChunkHead(s) => s,
            MessageSection::Trailer(s) => s,
        }
    }

    fn hooks_mut(&mut self) -> &mut dyn SectionHooks<'a> {
        match self {
            MessageSection::Request(s) => s,
            MessageSection::Status(s) => s,
            MessageSection::Header(s) => s,
            MessageSection::Body(s) | MessageSection::ChunkBody(s) => s,
            MessageSection::ChunkHead(s) => s,
            MessageSection::Trailer(s) => s,
        }
    }

    pub fn section_type(&self) -> SectionType {
        match self {
            MessageSection::Request(_) => SectionType::Request,
            MessageSection::Status(_) => SectionType::Status,
            MessageSection::Header(_) => SectionType::Header,
            MessageSection::Body(_) => SectionType::Body,
            MessageSection::ChunkHead(_) => SectionType::ChunkHead,
            MessageSection::ChunkBody(_) => SectionType::ChunkBody,
            MessageSection::Trailer(_) => SectionType::Trailer,
        }
    }

    pub fn common(&self) -> &SectionCommon<'a> {
        self.hooks().common()
    }

    pub fn source(&self) -> SourceId {
        self.common().source
    }

    pub fn consumed(&self) -> usize {
        self.common().consumed
    }

    pub fn infractions(&self) -> Infractions {
        self.common().infractions
    }

    /// Runs the pipeline and returns what detection should do with it
    pub fn run(&mut self, ctx: &mut SectionContext<'_>) -> Disposition {
        let kind = self.section_type();
        let hooks = self.hooks_mut();

        hooks.analyze(ctx.flow, ctx.settings);
        hooks.update_flow(ctx.flow);
        hooks.gen_events(kind, ctx.events);

        let common = hooks.common();
        let source = common.source;
        let mut disposition = hooks.worth_detection();
        if ctx.flow.expected(source) == SectionType::Abort {
            disposition = Disposition::Abort;
        }
        if disposition == Disposition::Inspect {
            hooks.legacy_clients(ctx.buffers);
        }

        debug!(
            section = %kind,
            %source,
            octets = common.consumed,
            infractions = common.infractions.bits(),
            next = %ctx.flow.expected(source),
            ?disposition,
            "Section analyzed"
        );
        disposition
    }

    /// Writes the diagnostic rendering of this section
    pub fn print_section(&self, out: &mut dyn Write) -> io::Result<()> {
        let common = self.common();
        writeln!(out, "HTTP message {}:", self.section_type())?;
        Field::new(common.section_bytes()).print(out, "Section", false)?;
        self.hooks().print_fields(out)?;
        writeln!(
            out,
            "Infractions: {:016x}, TCP close: {}",
            common.infractions.bits(),
            common.at_close()
        )?;
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_classify() {
        assert_eq!(MethodId::classify(b"GET"), Some(MethodId::Get));
        assert_eq!(MethodId::classify(b"HEAD"), Some(MethodId::Head));
        assert_eq!(MethodId::classify(b"PROPFIND"), Some(MethodId::Other));
        assert_eq!(MethodId::classify(b""), None);
        assert_eq!(MethodId::classify(b"GE T"), None);
        assert_eq!(MethodId::classify(b"\x16\x03\x01"), None);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(HttpVersion::parse(b"HTTP/1.1"), HttpVersion::Http11);
        assert_eq!(HttpVersion::parse(b"HTTP/1.0"), HttpVersion::Http10);
        assert_eq!(HttpVersion::parse(b"HTTP/2.0"), HttpVersion::Other);
        assert_eq!(HttpVersion::parse(b"HTTP/1"), HttpVersion::Invalid);
        assert_eq!(HttpVersion::parse(b"http/1.1"), HttpVersion::Invalid);
        assert_eq!(
            HttpVersion::parse(b"HTTP/3.0").infractions(),
            Infractions::UNSUPPORTED_VERSION
        );
    }

    #[test]
    fn test_next_line() {
        let raw = b"abc\r\nde\nf";
        let first = next_line(raw, 0);
        assert_eq!(first.content(raw), b"abc");
        assert!(!first.bare_lf);
        let second = next_line(raw, first.end);
        assert_eq!(second.content(raw), b"de");
        assert!(second.bare_lf);
        let third = next_line(raw, second.end);
        assert_eq!(third.content(raw), b"f");
        assert_eq!(third.end, raw.len());
    }

    #[test]
    fn test_leading_crlf() {
        assert_eq!(leading_crlf(b"\r\n\r\nGET"), 4);
        assert_eq!(leading_crlf(b"GET"), 0);
        assert_eq!(leading_crlf(b"\r\n"), 2);
    }

    #[test]
    fn test_no_section_for_terminal_states() {
        let flow = FlowData::new(8);
        let err = MessageSection::new(SectionType::Discard, b"x", SourceId::Client, false, &flow)
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
