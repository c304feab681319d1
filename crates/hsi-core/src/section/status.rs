//! Status line

use super::{leading_crlf, next_line, HttpVersion, SectionCommon, SectionHooks};
use crate::config::InspectSettings;
use crate::events::Infractions;
use crate::field::Field;
use crate::flow::{FlowData, SectionType};
use crate::inspector::Disposition;
use crate::transaction::StatusSummary;
use std::io::{self, Write};
use tracing::debug;

#[derive(Debug)]
pub struct StatusSection<'a> {
    common: SectionCommon<'a>,
    start_line: Field<'a>,
    version: Field<'a>,
    status_code: Field<'a>,
    reason_phrase: Field<'a>,
    version_id: HttpVersion,
    /// Numeric status, `None` when the code is malformed
    status_code_num: Option<u16>,
}

impl<'a> StatusSection<'a> {
    pub(crate) fn new(common: SectionCommon<'a>) -> Self {
        Self {
            common,
            start_line: Field::not_computed(),
            version: Field::not_computed(),
            status_code: Field::not_computed(),
            reason_phrase: Field::not_computed(),
            version_id: HttpVersion::Invalid,
            status_code_num: None,
        }
    }

    pub fn status_code_num(&self) -> Option<u16> {
        self.status_code_num
    }

    pub fn reason_phrase(&self) -> Field<'a> {
        self.reason_phrase
    }

    pub fn version_id(&self) -> HttpVersion {
        self.version_id
    }
}

impl<'a> SectionHooks<'a> for StatusSection<'a> {
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

        if !content.starts_with(b"HTTP/") {
            self.common.replace_infractions(Infractions::NOT_HTTP);
            return;
        }

        let mut parts = content.splitn(3, |&b| b == b' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next();
        let reason = parts.next();

        self.version = Field::new(version);
        self.version_id = HttpVersion::parse(version);
        self.common.infract(self.version_id.infractions());

        self.status_code = match code {
            Some(code) if !code.is_empty() => Field::new(code),
            _ => Field::not_present(),
        };
        self.status_code_num = code
            .filter(|c| c.len() == 3)
            .and_then(|c| http::StatusCode::from_bytes(c).ok())
            .map(|c| c.as_u16());
        if self.status_code_num.is_none() {
            self.common.infract(Infractions::BAD_STATUS_CODE);
        }

        self.reason_phrase = match reason {
            Some(reason) => Field::new(reason),
            None => Field::not_present(),
        };
        if !self.reason_phrase.has_data() {
            self.common.infract(Infractions::MISSING_REASON);
        }
    }

    fn update_flow(&mut self, flow: &mut FlowData) {
        let source = self.common.source;
        if !self.start_line.is_present() {
            return;
        }
        if self.common.infractions.contains(Infractions::NOT_HTTP) {
            debug!(%source, "Status line is not HTTP, discarding direction");
            flow.finish_message(source, SectionType::Discard);
            return;
        }

        let summary = StatusSummary {
            code: self.status_code_num,
            reason: self.reason_phrase.bytes().map(<[u8]>::to_vec).unwrap_or_default(),
            version: self.version_id,
        };
        if !flow.transactions.attach_response(summary) {
            self.common.infract(Infractions::RESPONSE_WITHOUT_REQUEST);
        }
        flow[source].expected = SectionType::Header;
    }

    fn worth_detection(&self) -> Disposition {
        Disposition::Ignore
    }

    fn print_fields(&self, out: &mut dyn Write) -> io::Result<()> {
        self.start_line.print(out, "Status line", false)?;
        self.version.print(out, "Version", false)?;
        self.status_code.print(out, "Status code", false)?;
        self.reason_phrase.print(out, "Reason phrase", false)?;
        writeln!(
            out,
            "Version ID: {}, Status code number: {}",
            self.version_id,
            self.status_code_num.map_or(-1, i32::from)
        )
    }
}
