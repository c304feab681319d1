//! Infractions and the anomaly events they surface as
//!
//! Sections record protocol problems in an [`Infractions`] mask while they
//! parse. `gen_events` later turns each recorded bit into an [`EventCode`]
//! for the detection engine.

use crate::flow::{SectionType, SourceId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Protocol anomalies recorded by a section
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Infractions: u64 {
        const NOT_HTTP                   = 1 << 0;
        const BAD_METHOD                 = 1 << 1;
        const BAD_URI                    = 1 << 2;
        const BAD_VERSION                = 1 << 3;
        const UNSUPPORTED_VERSION        = 1 << 4;
        const BAD_STATUS_CODE            = 1 << 5;
        const MISSING_REASON             = 1 << 6;
        const LEADING_CRLF               = 1 << 7;
        const BARE_LF                    = 1 << 8;
        const HEADER_NO_COLON            = 1 << 9;
        const HEADER_NAME_WHITESPACE     = 1 << 10;
        const BAD_HEADER_NAME            = 1 << 11;
        const OBS_FOLD                   = 1 << 12;
        const TOO_MANY_HEADERS           = 1 << 13;
        const MULTIPLE_CONTENT_LENGTH    = 1 << 14;
        const CONFLICTING_CONTENT_LENGTH = 1 << 15;
        const BAD_CONTENT_LENGTH         = 1 << 16;
        const BOTH_TE_AND_CL             = 1 << 17;
        const CHUNKED_NOT_LAST           = 1 << 18;
        const UNKNOWN_TRANSFER_CODING    = 1 << 19;
        const BODY_ON_NO_BODY_RESPONSE   = 1 << 20;
        const RESPONSE_WITHOUT_REQUEST   = 1 << 21;
        const BAD_CHUNK_SIZE             = 1 << 22;
        const CHUNK_SIZE_OVERFLOW        = 1 << 23;
        const CHUNK_TERMINATOR_MISSING   = 1 << 24;
        const BODY_TRUNCATED             = 1 << 25;
        const PIPELINE_OVERFLOW          = 1 << 26;
    }
}

impl Infractions {
    /// Infractions after which message framing cannot be trusted
    pub const DISASTER: Infractions = Infractions::CONFLICTING_CONTENT_LENGTH
        .union(Infractions::BAD_CONTENT_LENGTH)
        .union(Infractions::BAD_CHUNK_SIZE)
        .union(Infractions::CHUNK_SIZE_OVERFLOW);

    pub fn is_disaster(&self) -> bool {
        self.intersects(Self::DISASTER)
    }
}

/// Anomaly events visible to the detection engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum EventCode {
    NotHttp = 1,
    BadMethod = 2,
    BadUri = 3,
    BadVersion = 4,
    UnsupportedVersion = 5,
    BadStatusCode = 6,
    MissingReason = 7,
    LeadingCrlf = 8,
    BareLf = 9,
    HeaderNoColon = 10,
    HeaderNameWhitespace = 11,
    BadHeaderName = 12,
    ObsFold = 13,
    TooManyHeaders = 14,
    MultipleContentLength = 15,
    ConflictingContentLength = 16,
    BadContentLength = 17,
    BothTeAndCl = 18,
    ChunkedNotLast = 19,
    UnknownTransferCoding = 20,
    BodyOnNoBodyResponse = 21,
    ResponseWithoutRequest = 22,
    BadChunkSize = 23,
    ChunkSizeOverflow = 24,
    ChunkTerminatorMissing = 25,
    BodyTruncated = 26,
    PipelineOverflow = 27,
}

const EVENT_TABLE: &[(Infractions, EventCode)] = &[
    (Infractions::NOT_HTTP, EventCode::NotHttp),
    (Infractions::BAD_METHOD, EventCode::BadMethod),
    (Infractions::BAD_URI, EventCode::BadUri),
    (Infractions::BAD_VERSION, EventCode::BadVersion),
    (Infractions::UNSUPPORTED_VERSION, EventCode::UnsupportedVersion),
    (Infractions::BAD_STATUS_CODE, EventCode::BadStatusCode),
    (Infractions::MISSING_REASON, EventCode::MissingReason),
    (Infractions::LEADING_CRLF, EventCode::LeadingCrlf),
    (Infractions::BARE_LF, EventCode::BareLf),
    (Infractions::HEADER_NO_COLON, EventCode::HeaderNoColon),
    (Infractions::HEADER_NAME_WHITESPACE, EventCode::HeaderNameWhitespace),
    (Infractions::BAD_HEADER_NAME, EventCode::BadHeaderName),
    (Infractions::OBS_FOLD, EventCode::ObsFold),
    (Infractions::TOO_MANY_HEADERS, EventCode::TooManyHeaders),
    (Infractions::MULTIPLE_CONTENT_LENGTH, EventCode::MultipleContentLength),
    (Infractions::CONFLICTING_CONTENT_LENGTH, EventCode::ConflictingContentLength),
    (Infractions::BAD_CONTENT_LENGTH, EventCode::BadContentLength),
    (Infractions::BOTH_TE_AND_CL, EventCode::BothTeAndCl),
    (Infractions::CHUNKED_NOT_LAST, EventCode::ChunkedNotLast),
    (Infractions::UNKNOWN_TRANSFER_CODING, EventCode::UnknownTransferCoding),
    (Infractions::BODY_ON_NO_BODY_RESPONSE, EventCode::BodyOnNoBodyResponse),
    (Infractions::RESPONSE_WITHOUT_REQUEST, EventCode::ResponseWithoutRequest),
    (Infractions::BAD_CHUNK_SIZE, EventCode::BadChunkSize),
    (Infractions::CHUNK_SIZE_OVERFLOW, EventCode::ChunkSizeOverflow),
    (Infractions::CHUNK_TERMINATOR_MISSING, EventCode::ChunkTerminatorMissing),
    (Infractions::BODY_TRUNCATED, EventCode::BodyTruncated),
    (Infractions::PIPELINE_OVERFLOW, EventCode::PipelineOverflow),
];

impl EventCode {
    /// Stable numeric id used by rules
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Events for every infraction in `mask`, in bit order
    pub fn from_infractions(mask: Infractions) -> impl Iterator<Item = EventCode> {
        EVENT_TABLE
            .iter()
            .filter(move |(bit, _)| mask.contains(*bit))
            .map(|(_, code)| *code)
    }

    pub fn description(self) -> &'static str {
        match self {
            EventCode::NotHttp => "message start is not HTTP",
            EventCode::BadMethod => "request method is not a valid token",
            EventCode::BadUri => "request target missing or malformed",
            EventCode::BadVersion => "HTTP version malformed",
            EventCode::UnsupportedVersion => "HTTP version not 1.0 or 1.1",
            EventCode::BadStatusCode => "status code is not three digits",
            EventCode::MissingReason => "status line has no reason phrase",
            EventCode::LeadingCrlf => "empty lines before message start",
            EventCode::BareLf => "line terminated by LF without CR",
            EventCode::HeaderNoColon => "header line without colon",
            EventCode::HeaderNameWhitespace => "whitespace between header name and colon",
            EventCode::BadHeaderName => "header name is not a valid token",
            EventCode::ObsFold => "obsolete header line folding",
            EventCode::TooManyHeaders => "header count above limit",
            EventCode::MultipleContentLength => "multiple Content-Length headers",
            EventCode::ConflictingContentLength => "Content-Length values disagree",
            EventCode::BadContentLength => "Content-Length is not a valid length",
            EventCode::BothTeAndCl => "both Transfer-Encoding and Content-Length present",
            EventCode::ChunkedNotLast => "chunked is not the final transfer coding",
            EventCode::UnknownTransferCoding => "unknown transfer coding",
            EventCode::BodyOnNoBodyResponse => "body framing on a response that cannot have a body",
            EventCode::ResponseWithoutRequest => "response without outstanding request",
            EventCode::BadChunkSize => "chunk size line malformed",
            EventCode::ChunkSizeOverflow => "chunk size too large",
            EventCode::ChunkTerminatorMissing => "chunk data not followed by CRLF",
            EventCode::BodyTruncated => "connection closed before body complete",
            EventCode::PipelineOverflow => "too many pipelined requests",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id(), self.description())
    }
}

/// An anomaly event raised while analyzing one section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub code: EventCode,
    pub source: SourceId,
    pub section: SectionType,
}

/// Receives anomaly events as they are generated
pub trait EventSink {
    fn emit(&mut self, event: AnomalyEvent);
}

impl EventSink for Vec<AnomalyEvent> {
    fn emit(&mut self, event: AnomalyEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_infraction_has_an_event() {
        assert_eq!(EVENT_TABLE.len(), Infractions::all().iter().count());
        let all: Vec<_> = EventCode::from_infractions(Infractions::all()).collect();
        assert_eq!(all.len(), EVENT_TABLE.len());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let mut ids: Vec<u16> = EVENT_TABLE.iter().map(|(_, c)| c.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), EVENT_TABLE.len());
    }

    #[test]
    fn test_from_infractions() {
        let mask = Infractions::BARE_LF | Infractions::MULTIPLE_CONTENT_LENGTH;
        let codes: Vec<_> = EventCode::from_infractions(mask).collect();
        assert_eq!(codes, vec![EventCode::BareLf, EventCode::MultipleContentLength]);
    }

    #[test]
    fn test_disaster_mask() {
        assert!(Infractions::BAD_CHUNK_SIZE.is_disaster());
        assert!((Infractions::OBS_FOLD | Infractions::BAD_CONTENT_LENGTH).is_disaster());
        assert!(!Infractions::MULTIPLE_CONTENT_LENGTH.is_disaster());
        assert!(!Infractions::empty().is_disaster());
    }

    #[test]
    fn test_event_serialization() {
        let event = AnomalyEvent {
            code: EventCode::MultipleContentLength,
            source: SourceId::Server,
            section: SectionType::Header,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"multiple_content_length\""));
        assert!(json.contains("\"server\""));
        assert!(json.contains("\"header\""));
    }
}
