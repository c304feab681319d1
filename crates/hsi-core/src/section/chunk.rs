//! Chunk size line

use super::{leading_crlf, next_line, SectionCommon, SectionHooks};
use crate::config::InspectSettings;
use crate::events::Infractions;
use crate::field::Field;
use crate::flow::{FlowData, SectionType};
use crate::inspector::Disposition;
use std::io::{self, Write};
use tracing::debug;

/// Hex digits that fit in a u64
const MAX_SIZE_DIGITS: usize = 16;

#[derive(Debug)]
pub struct ChunkHeadSection<'a> {
    common: SectionCommon<'a>,
    size_line: Field<'a>,
    extensions: Field<'a>,
    chunk_size: Option<u64>,
    /// Cumulative body length once this chunk's data is consumed
    target_length: Option<i64>,
}

impl<'a> ChunkHeadSection<'a> {
    pub(crate) fn new(common: SectionCommon<'a>) -> Self {
        Self {
            common,
            size_line: Field::not_computed(),
            extensions: Field::not_computed(),
            chunk_size: None,
            target_length: None,
        }
    }

    pub fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    pub fn extensions(&self) -> Field<'a> {
        self.extensions
    }
}

/// Parses a chunk size line (without its terminator)
fn parse_size(line: &[u8]) -> Result<u64, Infractions> {
    let digits = line.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return Err(Infractions::BAD_CHUNK_SIZE);
    }
    let mut terminated = Vec::with_capacity(line.len() + 2);
    terminated.extend_from_slice(line);
    terminated.extend_from_slice(b"\r\n");
    match httparse::parse_chunk_size(&terminated) {
        Ok(httparse::Status::Complete((_, size))) if i64::try_from(size).is_ok() => Ok(size),
        Ok(httparse::Status::Complete(_)) => Err(Infractions::CHUNK_SIZE_OVERFLOW),
        Err(_) if digits > MAX_SIZE_DIGITS => Err(Infractions::CHUNK_SIZE_OVERFLOW),
        Ok(httparse::Status::Partial) | Err(_) => Err(Infractions::BAD_CHUNK_SIZE),
    }
}

impl<'a> SectionHooks<'a> for ChunkHeadSection<'a> {
    fn common(&self) -> &SectionCommon<'a> {
        &self.common
    }

    fn analyze(&mut self, flow: &FlowData, _settings: &InspectSettings) {
        let raw = self.common.raw;
        let state = &flow[self.common.source];
        let lead = leading_crlf(raw);
        // After chunk data the leading CRLF ends the previous chunk
        if lead > 0 && state.num_chunks == 0 {
            self.common.infract(Infractions::LEADING_CRLF);
        }
        if lead == raw.len() {
            self.common.set_consumed(lead);
            return;
        }

        let line = next_line(raw, lead);
        if line.bare_lf {
            self.common.infract(Infractions::BARE_LF);
        }
        self.common.set_consumed(line.end);
        let content = line.content(raw);
        self.size_line = Field::new(content);
        self.extensions = match content.iter().position(|&b| b == b';') {
            Some(semi) => Field::new(&content[semi + 1..]),
            None => Field::not_present(),
        };

        match parse_size(content) {
            Ok(size) => {
                self.chunk_size = Some(size);
                self.target_length = state
                    .body_octets
                    .checked_add(size)
                    .and_then(|total| i64::try_from(total).ok());
                if self.target_length.is_none() {
                    self.common.infract(Infractions::CHUNK_SIZE_OVERFLOW);
                }
            }
            Err(infraction) => self.common.infract(infraction),
        }
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        if self.common.infractions.is_disaster() {
            debug!(
                %source,
                line = %String::from_utf8_lossy(self.size_line.bytes().unwrap_or_default()),
                "Bad chunk size, aborting flow"
            );
            flow.finish_message(source, SectionType::Abort);
            flow.transactions.clear();
            return;
        }
        let (Some(size), Some(target)) = (self.chunk_size, self.target_length) else {
            // Only the end of the previous chunk arrived
            return;
        };

        let state = &mut flow[source];
        state.num_chunks += 1;
        if size == 0 {
            state.expected = SectionType::Trailer;
        } else {
            state.expected = SectionType::ChunkBody;
            state.data_length = target;
        }
    }

    fn worth_detection(&self) -> Disposition {
        Disposition::Ignore
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.size_line.print(out, "Chunk size line", false)?;
        self.extensions.print(out, "Chunk extensions", false)?;
        match self.chunk_size {
            Some(size) => writeln!(out, "Chunk size: {}", size),
            None => writeln!(out, "Chunk size: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::SourceId;

    fn run<'a>(raw: &'a [u8], flow: &mut FlowData) -> ChunkHeadSection<'a> {
        let mut section = ChunkHeadSection::new(SectionCommon::new(raw, SourceId::Server, false));
        section.analyze(flow, &InspectSettings::default());
        section.update_flow(flow);
        section
    }

    fn chunked_flow() -> FlowData {
        let mut flow = FlowData::new(8);
        flow[SourceId::Server].expected = SectionType::ChunkHead;
        flow
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size(b"1a"), Ok(26));
        assert_eq!(parse_size(b"0"), Ok(0));
        assert_eq!(parse_size(b"5;name=value"), Ok(5));
        assert_eq!(parse_size(b""), Err(Infractions::BAD_CHUNK_SIZE));
        assert_eq!(parse_size(b"xyz"), Err(Infractions::BAD_CHUNK_SIZE));
        assert_eq!(parse_size(b"5 junk"), Err(Infractions::BAD_CHUNK_SIZE));
        assert_eq!(
            parse_size(b"fffffffffffffffff"),
            Err(Infractions::CHUNK_SIZE_OVERFLOW)
        );
        assert_eq!(
            parse_size(b"ffffffffffffffff"),
            Err(Infractions::CHUNK_SIZE_OVERFLOW)
        );
    }

    #[test]
    fn test_chunk_head_sets_length() {
        let mut flow = chunked_flow();
        flow[SourceId::Server].body_octets = 10;
        let section = run(b"1a;ext\r\nxxxx", &mut flow);
        assert_eq!(section.common.consumed(), 8);
        assert_eq!(section.extensions().bytes(), Some(&b"ext"[..]));
        let state = &flow[SourceId::Server];
        assert_eq!(state.expected, SectionType::ChunkBody);
        assert_eq!(state.num_chunks, 1);
        assert_eq!(state.remaining(), Some(26));
    }

    #[test]
    fn test_last_chunk_goes_to_trailer() {
        let mut flow = chunked_flow();
        flow[SourceId::Server].num_chunks = 2;
        let section = run(b"\r\n0\r\n", &mut flow);
        assert!(section.common.infractions().is_empty());
        assert_eq!(flow.expected(SourceId::Server), SectionType::Trailer);
        assert_eq!(flow[SourceId::Server].num_chunks, 3);
    }

    #[test]
    fn test_previous_terminator_only() {
        let mut flow = chunked_flow();
        flow[SourceId::Server].num_chunks = 1;
        let section = run(b"\r\n", &mut flow);
        assert_eq!(section.common.consumed(), 2);
        assert_eq!(flow.expected(SourceId::Server), SectionType::ChunkHead);
        assert_eq!(flow[SourceId::Server].num_chunks, 1);
    }

    #[test]
    fn test_bad_size_aborts() {
        let mut flow = chunked_flow();
        let section = run(b"zz\r\n", &mut flow);
        assert!(section.common.infractions().contains(Infractions::BAD_CHUNK_SIZE));
        assert_eq!(flow.expected(SourceId::Server), SectionType::Abort);
    }
}
