//! Header value normalization
//!
//! Raw header values are unfolded, trimmed and combined per header id before
//! the framing decision looks at them. Transfer-Encoding and Content-Length
//! get typed representations.

use crate::events::Infractions;
use crate::field::Field;
use http::header::HeaderName;
use std::collections::BTreeMap;

/// Headers the inspector understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderId {
    ContentLength,
    TransferEncoding,
    Host,
    Connection,
    ContentType,
    ContentEncoding,
    Cookie,
    SetCookie,
    UserAgent,
    Trailer,
    Upgrade,
    Expect,
    Other,
}

impl HeaderId {
    /// Identifies a header by its (already validated) lowercase name
    pub fn from_name(name: &HeaderName) -> Self {
        match name.as_str() {
            "content-length" => HeaderId::ContentLength,
            "transfer-encoding" => HeaderId::TransferEncoding,
            "host" => HeaderId::Host,
            "connection" => HeaderId::Connection,
            "content-type" => HeaderId::ContentType,
            "content-encoding" => HeaderId::ContentEncoding,
            "cookie" => HeaderId::Cookie,
            "set-cookie" => HeaderId::SetCookie,
            "user-agent" => HeaderId::UserAgent,
            "trailer" => HeaderId::Trailer,
            "upgrade" => HeaderId::Upgrade,
            "expect" => HeaderId::Expect,
            _ => HeaderId::Other,
        }
    }

    /// Identifies a header name, validating it as a token.
    ///
    /// Names that are not valid tokens are still matched case-insensitively
    /// so a damaged Content-Length keeps its meaning; the returned infractions
    /// record the damage.
    pub fn classify(raw: &[u8]) -> (Self, Infractions) {
        let mut infractions = Infractions::empty();
        let trimmed = trim_ows_end(raw);
        if trimmed.len() != raw.len() {
            infractions |= Infractions::HEADER_NAME_WHITESPACE;
        }
        match HeaderName::from_bytes(trimmed) {
            Ok(name) => (Self::from_name(&name), infractions),
            Err(_) => {
                infractions |= Infractions::BAD_HEADER_NAME;
                let lowered = trimmed.to_ascii_lowercase();
                let id = HeaderName::from_bytes(&lowered)
                    .map(|name| Self::from_name(&name))
                    .unwrap_or(HeaderId::Other);
                (id, infractions)
            }
        }
    }
}

/// One header line as located in the section buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLine<'a> {
    pub id: HeaderId,
    pub name: Field<'a>,
    /// Raw value, possibly spanning folded continuation lines
    pub value: Field<'a>,
}

/// A coding named in Transfer-Encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCoding {
    Chunked,
    Gzip,
    Deflate,
    Compress,
    Identity,
    Other,
}

impl TransferCoding {
    fn parse(token: &[u8]) -> Self {
        let lowered = token.to_ascii_lowercase();
        match lowered.as_slice() {
            b"chunked" => TransferCoding::Chunked,
            b"gzip" | b"x-gzip" => TransferCoding::Gzip,
            b"deflate" => TransferCoding::Deflate,
            b"compress" | b"x-compress" => TransferCoding::Compress,
            b"identity" => TransferCoding::Identity,
            _ => TransferCoding::Other,
        }
    }
}

/// Normalized Content-Length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    NotPresent,
    Valid(i64),
    /// Non-digits, empty, or too large for an i64
    Bad,
    /// Several well formed values that disagree
    Conflicting,
}

/// Header values after unfolding, trimming and combining
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedHeaders {
    values: BTreeMap<HeaderId, Vec<u8>>,
    counts: BTreeMap<HeaderId, u32>,
    transfer_codings: Vec<TransferCoding>,
    content_length: Option<ContentLength>,
}

impl NormalizedHeaders {
    pub fn from_lines(lines: &[HeaderLine<'_>]) -> Self {
        let mut norm = NormalizedHeaders::default();
        for line in lines {
            *norm.counts.entry(line.id).or_insert(0) += 1;
            if line.id == HeaderId::Other {
                continue;
            }
            let value = line.value.bytes().map(unfold).unwrap_or_default();
            norm.values
                .entry(line.id)
                .and_modify(|combined| {
                    let sep: &[u8] = if line.id == HeaderId::Cookie { b"; " } else { b", " };
                    combined.extend_from_slice(sep);
                    combined.extend_from_slice(&value);
                })
                .or_insert(value);
        }
        if let Some(te) = norm.values.get(&HeaderId::TransferEncoding) {
            norm.transfer_codings = parse_transfer_codings(te);
        }
        norm.content_length = Some(match norm.values.get(&HeaderId::ContentLength) {
            Some(cl) => parse_content_length(cl),
            None => ContentLength::NotPresent,
        });
        norm
    }

    pub fn count(&self, id: HeaderId) -> u32 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Combined, normalized value of a recognized header
    pub fn value(&self, id: HeaderId) -> Option<&[u8]> {
        self.values.get(&id).map(Vec::as_slice)
    }

    pub fn transfer_codings(&self) -> &[TransferCoding] {
        &self.transfer_codings
    }

    /// True when the final transfer coding is chunked
    pub fn is_chunked(&self) -> bool {
        self.transfer_codings.last() == Some(&TransferCoding::Chunked)
    }

    pub fn content_length(&self) -> ContentLength {
        self.content_length.unwrap_or(ContentLength::NotPresent)
    }

    /// Framing-related infractions of this header block.
    ///
    /// Content-Length damage only counts when chunked coding does not
    /// override the length.
    pub fn framing_infractions(&self) -> Infractions {
        let mut infractions = Infractions::empty();
        let cl_count = self.count(HeaderId::ContentLength);
        if cl_count > 1 {
            infractions |= Infractions::MULTIPLE_CONTENT_LENGTH;
        }
        if cl_count > 0 && self.count(HeaderId::TransferEncoding) > 0 {
            infractions |= Infractions::BOTH_TE_AND_CL;
        }
        let codings = &self.transfer_codings;
        if let Some(pos) = codings.iter().position(|c| *c == TransferCoding::Chunked) {
            if pos + 1 != codings.len() {
                infractions |= Infractions::CHUNKED_NOT_LAST;
            }
        }
        if codings.contains(&TransferCoding::Other) {
            infractions |= Infractions::UNKNOWN_TRANSFER_CODING;
        }
        if !self.is_chunked() {
            match self.content_length() {
                ContentLength::Bad => infractions |= Infractions::BAD_CONTENT_LENGTH,
                ContentLength::Conflicting => {
                    infractions |= Infractions::CONFLICTING_CONTENT_LENGTH
                }
                ContentLength::NotPresent | ContentLength::Valid(_) => {}
            }
        }
        infractions
    }
}

/// Replaces each folded line break (with its leading whitespace) by one SP
/// and trims optional whitespace at both ends.
pub fn unfold(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\r' | b'\n' => {
                while i < raw.len() && matches!(raw[i], b'\r' | b'\n' | b' ' | b'\t') {
                    i += 1;
                }
                out.push(b' ');
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    trim_ows(&out).to_vec()
}

fn parse_transfer_codings(value: &[u8]) -> Vec<TransferCoding> {
    value
        .split(|&b| b == b',')
        .map(|element| {
            // Parameters after ';' do not change the coding
            let coding = element.split(|&b| b == b';').next().unwrap_or_default();
            trim_ows(coding)
        })
        .filter(|coding| !coding.is_empty())
        .map(TransferCoding::parse)
        .collect()
}

fn parse_content_length(value: &[u8]) -> ContentLength {
    let mut result: Option<i64> = None;
    let mut conflicting = false;
    for element in value.split(|&b| b == b',') {
        let element = trim_ows(element);
        if element.is_empty() || !element.iter().all(u8::is_ascii_digit) {
            return ContentLength::Bad;
        }
        let Some(parsed) = parse_decimal(element) else {
            return ContentLength::Bad;
        };
        match result {
            Some(previous) if previous != parsed => conflicting = true,
            _ => result = Some(parsed),
        }
    }
    match result {
        _ if conflicting => ContentLength::Conflicting,
        Some(length) => ContentLength::Valid(length),
        None => ContentLength::Bad,
    }
}

fn parse_decimal(digits: &[u8]) -> Option<i64> {
    digits.iter().try_fold(0i64, |acc, &d| {
        acc.checked_mul(10)?.checked_add(i64::from(d - b'0'))
    })
}

pub(crate) fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(bytes.len());
    trim_ows_end(&bytes[start..])
}

pub(crate) fn trim_ows_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(0, |p| p + 1);
    &bytes[..end]
}
