//! Header block parsing shared by the header and trailer sections

use super::next_line;
use crate::events::Infractions;
use crate::field::Field;
use crate::normalize::{trim_ows, HeaderId, HeaderLine};

/// A parsed block of header lines
#[derive(Debug, Clone, Default)]
pub struct HeadBlock<'a> {
    /// The header lines without the terminating empty line
    pub block: Field<'a>,
    pub lines: Vec<HeaderLine<'a>>,
    /// Octets used, including the terminating empty line if present
    pub consumed: usize,
    pub infractions: Infractions,
    /// The empty line ending the block was seen
    pub terminated: bool,
}

struct PendingLine<'a> {
    id: HeaderId,
    name: &'a [u8],
    value_start: usize,
    value_end: usize,
}

/// Splits `raw` into header lines up to and including the first empty line.
///
/// Without an empty line the whole buffer is taken as the block. Lines
/// starting with whitespace continue the previous value. `max_headers`
/// only raises an infraction; extra lines are still parsed.
pub fn parse_head(raw: &[u8], max_headers: usize) -> HeadBlock<'_> {
    let mut head = HeadBlock::default();
    let mut pending: Option<PendingLine<'_>> = None;
    let mut block_end = raw.len();
    let mut pos = 0;

    while pos < raw.len() {
        let line = next_line(raw, pos);
        if line.bare_lf {
            head.infractions |= Infractions::BARE_LF;
        }
        let content = line.content(raw);

        if content.is_empty() {
            block_end = line.start;
            pos = line.end;
            head.terminated = true;
            break;
        }

        if matches!(content[0], b' ' | b'\t') {
            match pending.as_mut() {
                Some(current) => {
                    head.infractions |= Infractions::OBS_FOLD;
                    current.value_end = line.content_end;
                }
                // Continuation with nothing to continue
                None => head.infractions |= Infractions::BAD_HEADER_NAME,
            }
            pos = line.end;
            continue;
        }

        if let Some(done) = pending.take() {
            head.lines.push(finish(raw, done));
        }
        match content.iter().position(|&b| b == b':') {
            Some(colon) => {
                let name = &content[..colon];
                let (id, infractions) = HeaderId::classify(name);
                head.infractions |= infractions;
                pending = Some(PendingLine {
                    id,
                    name,
                    value_start: line.start + colon + 1,
                    value_end: line.content_end,
                });
            }
            None => head.infractions |= Infractions::HEADER_NO_COLON,
        }
        pos = line.end;
    }

    if let Some(done) = pending.take() {
        head.lines.push(finish(raw, done));
    }
    if head.lines.len() > max_headers {
        head.infractions |= Infractions::TOO_MANY_HEADERS;
    }
    head.block = Field::new(&raw[..block_end.min(pos)]);
    head.consumed = pos;
    head
}

fn finish<'a>(raw: &'a [u8], line: PendingLine<'a>) -> HeaderLine<'a> {
    HeaderLine {
        id: line.id,
        name: Field::new(line.name),
        value: Field::new(trim_ows(&raw[line.value_start..line.value_end])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_block() {
        let raw = b"Host: x\r\nContent-Length:  5 \r\n\r\nbody";
        let head = parse_head(raw, 200);
        assert!(head.terminated);
        assert_eq!(head.consumed, raw.len() - 4);
        assert_eq!(head.lines.len(), 2);
        assert_eq!(head.lines[0].id, HeaderId::Host);
        assert_eq!(head.lines[1].value.bytes(), Some(&b"5"[..]));
        assert_eq!(head.block.bytes(), Some(&b"Host: x\r\nContent-Length:  5 \r\n"[..]));
        assert!(head.infractions.is_empty());
    }

    #[test]
    fn test_empty_block() {
        let head = parse_head(b"\r\n", 200);
        assert!(head.terminated);
        assert_eq!(head.consumed, 2);
        assert!(head.lines.is_empty());
        assert_eq!(head.block.length(), 0);
    }

    #[test]
    fn test_unterminated_block_takes_everything() {
        let raw = b"Host: x\r\nAccept: */*";
        let head = parse_head(raw, 200);
        assert!(!head.terminated);
        assert_eq!(head.consumed, raw.len());
        assert_eq!(head.lines.len(), 2);
    }

    #[test]
    fn test_obs_fold_and_bare_lf() {
        let raw = b"X-Long: a\n  b\r\nHost: y\r\n\r\n";
        let head = parse_head(raw, 200);
        assert!(head.infractions.contains(Infractions::OBS_FOLD));
        assert!(head.infractions.contains(Infractions::BARE_LF));
        assert_eq!(head.lines.len(), 2);
        assert_eq!(head.lines[0].value.bytes(), Some(&b"a\n  b"[..]));
    }

    #[test]
    fn test_malformed_lines() {
        let raw = b"NoColonHere\r\nBad Name: v\r\n\r\n";
        let head = parse_head(raw, 200);
        assert!(head.infractions.contains(Infractions::HEADER_NO_COLON));
        assert!(head.infractions.contains(Infractions::BAD_HEADER_NAME));
        assert_eq!(head.lines.len(), 1);
    }

    #[test]
    fn test_too_many_headers() {
        let raw = b"A: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        let head = parse_head(raw, 2);
        assert!(head.infractions.contains(Infractions::TOO_MANY_HEADERS));
        assert_eq!(head.lines.len(), 3);
    }
}
