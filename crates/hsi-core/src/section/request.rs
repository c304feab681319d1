//! Request line

use super::{leading_crlf, next_line, HttpVersion, MethodId, SectionCommon, SectionHooks};
use crate::config::InspectSettings;
use crate::events::Infractions;
use crate::field::Field;
use crate::flow::{FlowData, SectionType};
use crate::inspector::Disposition;
use crate::transaction::RequestSummary;
use std::io::{self, Write};
use tracing::debug;

#[derive(Debug)]
pub struct RequestSection<'a> {
    common: SectionCommon<'a>,
    start_line: Field<'a>,
    method: Field<'a>,
    uri: Field<'a>,
    version: Field<'a>,
    method_id: Option<MethodId>,
    version_id: HttpVersion,
}

impl<'a> RequestSection<'a> {
    pub(crate) fn new(common: SectionCommon<'a>) -> Self {
        Self {
            common,
            start_line: Field::not_computed(),
            method: Field::not_computed(),
            uri: Field::not_computed(),
            version: Field::not_computed(),
            method_id: None,
            version_id: HttpVersion::Invalid,
        }
    }

    pub fn start_line(&self) -> Field<'a> {
        self.start_line
    }

    pub fn method(&self) -> Field<'a> {
        self.method
    }

    pub fn uri(&self) -> Field<'a> {
        self.uri
    }

    pub fn method_id(&self) -> Option<MethodId> {
        self.method_id
    }

    pub fn version_id(&self) -> HttpVersion {
        self.version_id
    }

    fn is_not_http(&self) -> bool {
        self.common.infractions.contains(Infractions::NOT_HTTP)
    }
}

/// Splits a request line into method, target and version.
///
/// The target is everything between the first and the last space, so a
/// target with embedded spaces stays in one piece.
fn split_request_line(line: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let mut parts = line.splitn(2, |&b| b == b' ');
    let method = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    let rest = &rest[rest.iter().position(|&b| b != b' ').unwrap_or(rest.len())..];
    match rest.iter().rposition(|&b| b == b' ') {
        Some(p) => {
            let target = &rest[..p];
            let end = target.iter().rposition(|&b| b != b' ').map_or(0, |e| e + 1);
            (method, &target[..end], &rest[p + 1..])
        }
        None if rest.starts_with(b"HTTP/") => (method, &b""[..], rest),
        None => (method, rest, &b""[..]),
    }
}

impl<'a> SectionHooks<'a> for RequestSection<'a> {
    fn common(&self) -> &SectionCommon<'a> {
        &self.common
    }

    fn analyze(&mut self, _flow: &FlowData, _settings: &InspectSettings) {
        let raw = self.common.raw;
        let lead = leading_crlf(raw);
        if lead > 0 {
            self.common.infract(Infractions::LEADING_CRLF);
        }
        if lead == raw.len() {
            // Only empty lines so far, the request line is still to come
            self.common.set_consumed(lead);
            return;
        }

        let line = next_line(raw, lead);
        if line.bare_lf {
            self.common.infract(Infractions::BARE_LF);
        }
        self.common.set_consumed(line.end);
        let content = line.content(raw);
        self.start_line = Field::new(content);

        let (method, uri, version) = split_request_line(content);
        self.method = Field::new(method);
        self.method_id = MethodId::classify(method);
        if self.method_id.is_none() {
            self.common.infract(Infractions::BAD_METHOD);
        }

        if uri.is_empty() {
            self.uri = Field::not_present();
            self.common.infract(Infractions::BAD_URI);
        } else {
            self.uri = Field::new(uri);
            if http::Uri::try_from(uri).is_err() {
                self.common.infract(Infractions::BAD_URI);
            }
        }

        self.version = if version.is_empty() {
            Field::not_present()
        } else {
            Field::new(version)
        };
        self.version_id = HttpVersion::parse(version);
        self.common.infract(self.version_id.infractions());

        if self.method_id.is_none() && self.version_id == HttpVersion::Invalid {
            // Nothing here looks like HTTP; one event says so
            self.common.replace_infractions(Infractions::NOT_HTTP);
        }
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        if !self.start_line.is_present() {
            return;
        }
        if self.is_not_http() {
            debug!(%source, "Request is not HTTP, discarding direction");
            flow.finish_message(source, SectionType::Discard);
            return;
        }

        let summary = RequestSummary {
            method: self.method_id.unwrap_or(MethodId::Other),
            uri: self.uri.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
            version: self.version_id,
            host: None,
        };
        if !flow.transactions.open_request(summary) {
            self.common.infract(Infractions::PIPELINE_OVERFLOW);
        }
        flow[source].expected = SectionType::Header;
    }

    fn worth_detection(&self) -> Disposition {
        // Inspected together with the header block
        Disposition::Ignore
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.start_line.print(out, "Request line", false)?;
        self.method.print(out, "Method", false)?;
        self.uri.print(out, "URI", false)?;
        self.version.print(out, "Version", false)?;
        writeln!(
            out,
            "Method ID: {:?}, Version ID: {}",
            self.method_id, self.version_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::SourceId;

    fn analyze(raw: &[u8]) -> RequestSection<'_> {
        let flow = FlowData::new(8);
        let mut section = RequestSection::new(SectionCommon::new(raw, SourceId::Client, false));
        section.analyze(&flow, &InspectSettings::default());
        section
    }

    #[test]
    fn test_split_request_line() {
        assert_eq!(
            split_request_line(b"GET /a HTTP/1.1"),
            (&b"GET"[..], &b"/a"[..], &b"HTTP/1.1"[..])
        );
        assert_eq!(
            split_request_line(b"GET /a b HTTP/1.1"),
            (&b"GET"[..], &b"/a b"[..], &b"HTTP/1.1"[..])
        );
        assert_eq!(split_request_line(b"GET /"), (&b"GET"[..], &b"/"[..], &b""[..]));
        assert_eq!(
            split_request_line(b"GET HTTP/1.0"),
            (&b"GET"[..], &b""[..], &b"HTTP/1.0"[..])
        );
    }

    #[test]
    fn test_valid_request_line() {
        let section = analyze(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(section.common.infractions().is_empty());
        assert_eq!(section.common.consumed(), 26);
        assert_eq!(section.method_id(), Some(MethodId::Get));
        assert_eq!(section.uri().bytes(), Some(&b"/index.html"[..]));
        assert_eq!(section.version_id(), HttpVersion::Http11);
    }

    #[test]
    fn test_leading_crlf_and_bare_lf() {
        let section = analyze(b"\r\nHEAD * HTTP/1.0\n");
        let infractions = section.common.infractions();
        assert!(infractions.contains(Infractions::LEADING_CRLF));
        assert!(infractions.contains(Infractions::BARE_LF));
        assert_eq!(section.method_id(), Some(MethodId::Head));
    }

    #[test]
    fn test_only_empty_lines() {
        let section = analyze(b"\r\n\r\n");
        assert_eq!(section.common.consumed(), 4);
        assert!(!section.start_line().is_present());
    }

    #[test]
    fn test_bad_parts() {
        let section = analyze(b"GET /a b HTTP/9\r\n");
        let infractions = section.common.infractions();
        assert!(infractions.contains(Infractions::BAD_URI));
        assert!(infractions.contains(Infractions::BAD_VERSION));
        assert!(!infractions.contains(Infractions::NOT_HTTP));

        let section = analyze(b"GET HTTP/1.1\r\n");
        assert_eq!(section.uri().length(), crate::field::STAT_NOT_PRESENT);
        assert!(section.common.infractions().contains(Infractions::BAD_URI));
    }

    #[test]
    fn test_not_http() {
        let section = analyze(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03");
        assert_eq!(section.common.infractions(), Infractions::NOT_HTTP);
    }

    #[test]
    fn test_update_flow_opens_transaction() {
        let raw = b"HEAD / HTTP/1.1\r\n";
        let mut flow = FlowData::new(8);
        let mut section = RequestSection::new(SectionCommon::new(raw, SourceId::Client, false));
        section.analyze(&flow, &InspectSettings::default());
        section.update_flow(&mut flow);
        assert_eq!(flow.expected(SourceId::Client), SectionType::Header);
        assert_eq!(flow.transactions.pending_len(), 1);
    }
}
