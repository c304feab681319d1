//! Zero-copy views into section buffers
//!
//! A [`Field`] is a borrowed byte range plus a signed length. Negative lengths
//! are sentinels that say why there is no data, and every accessor checks them
//! before touching the bytes.

use std::io::{self, Write};

/// The field was looked for and is not in the message
pub const STAT_NOT_PRESENT: i32 = -11;

/// The field exists in principle but nobody has derived it yet
pub const STAT_NOT_COMPUTED: i32 = -14;

/// There was no source data to derive the field from
pub const STAT_NO_SOURCE: i32 = -16;

/// Maximum number of octets rendered by [`Field::print`]
pub const PRINT_LIMIT: usize = 1000;

/// Output column width used when wrapping rendered fields
const LINE_WIDTH: usize = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Repr<'a> {
    Present(&'a [u8]),
    NotPresent,
    NotComputed,
    NoSource,
}

/// A borrowed view into a section buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Field<'a> {
    repr: Repr<'a>,
}

/// The "no source data" field, usable anywhere without allocation
pub const FIELD_NULL: Field<'static> = Field {
    repr: Repr::NoSource,
};

impl<'a> Field<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self {
            repr: Repr::Present(bytes),
        }
    }

    pub const fn not_present() -> Self {
        Self {
            repr: Repr::NotPresent,
        }
    }

    pub const fn not_computed() -> Self {
        Self {
            repr: Repr::NotComputed,
        }
    }

    /// Signed length: the octet count, or one of the `STAT_*` sentinels.
    ///
    /// Views longer than `i32::MAX` report `i32::MAX`.
    pub fn length(&self) -> i32 {
        match self.repr {
            Repr::Present(bytes) => i32::try_from(bytes.len()).unwrap_or(i32::MAX),
            Repr::NotPresent => STAT_NOT_PRESENT,
            Repr::NotComputed => STAT_NOT_COMPUTED,
            Repr::NoSource => STAT_NO_SOURCE,
        }
    }

    /// The viewed bytes, or `None` for any sentinel
    pub fn bytes(&self) -> Option<&'a [u8]> {
        match self.repr {
            Repr::Present(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self.repr, Repr::Present(_))
    }

    /// True when the field is present and holds at least one octet
    pub fn has_data(&self) -> bool {
        self.bytes().is_some_and(|b| !b.is_empty())
    }

    /// Renders the field for diagnostics.
    ///
    /// Printable ASCII is written as-is, CR as `~`, LF as `^` and anything
    /// else as `*`. At most [`PRINT_LIMIT`] octets are shown. With
    /// `int_vals`, a field whose printed length is a multiple of eight is
    /// followed by its little-endian `u64` reinterpretation. Sentinel fields
    /// write nothing.
    pub fn print<W: Write + ?Sized>(&self, out: &mut W, name: &str, int_vals: bool) -> io::Result<()> {
        let Some(bytes) = self.bytes() else {
            return Ok(());
        };

        let header = format!("{}, length = {}, ", name, bytes.len());
        out.write_all(header.as_bytes())?;
        if bytes.is_empty() {
            return out.write_all(b"\n");
        }

        let shown = &bytes[..bytes.len().min(PRINT_LIMIT)];
        let first_line = LINE_WIDTH.saturating_sub(header.len()).max(1);
        let mut rendered = Vec::with_capacity(shown.len() + shown.len() / LINE_WIDTH + 1);
        for (k, &b) in shown.iter().enumerate() {
            rendered.push(render_octet(b));
            let column = if k < first_line {
                k + 1 == first_line
            } else {
                (k + 1 - first_line) % LINE_WIDTH == 0
            };
            if column && k + 1 < shown.len() {
                rendered.push(b'\n');
            }
        }
        out.write_all(&rendered)?;

        if int_vals && shown.len() % 8 == 0 {
            out.write_all(b"\nInteger values =")?;
            for group in shown.chunks_exact(8) {
                let mut word = [0u8; 8];
                word.copy_from_slice(group);
                write!(out, " {}", u64::from_le_bytes(word))?;
            }
        }
        out.write_all(b"\n")
    }

    /// Convenience wrapper around [`Field::print`] for tests and logging
    pub fn render(&self, name: &str, int_vals: bool) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.print(&mut out, name, int_vals);
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl Default for Field<'_> {
    fn default() -> Self {
        Self::not_computed()
    }
}

impl<'a> From<&'a [u8]> for Field<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

fn render_octet(b: u8) -> u8 {
    match b {
        0x20..=0x7E => b,
        b'\r' => b'~',
        b'\n' => b'^',
        _ => b'*',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_lengths() {
        assert_eq!(Field::not_present().length(), STAT_NOT_PRESENT);
        assert_eq!(Field::not_computed().length(), STAT_NOT_COMPUTED);
        assert_eq!(FIELD_NULL.length(), STAT_NO_SOURCE);
        assert!(FIELD_NULL.bytes().is_none());
        assert!(!Field::not_present().has_data());
    }

    #[test]
    fn test_sentinels_render_nothing() {
        assert_eq!(FIELD_NULL.render("uri", true), "");
        assert_eq!(Field::not_present().render("uri", false), "");
        assert_eq!(Field::not_computed().render("uri", false), "");
    }

    #[test]
    fn test_render_control_characters() {
        let field = Field::new(b"GET /\r\n\x00\xff");
        assert_eq!(field.render("line", false), "line, length = 9, GET /~^**\n");
    }

    #[test]
    fn test_render_empty_field() {
        let field = Field::new(b"");
        assert_eq!(field.length(), 0);
        assert_eq!(field.render("body", false), "body, length = 0, \n");
    }

    #[test]
    fn test_render_is_idempotent() {
        let data: Vec<u8> = (0u8..=255).collect();
        let field = Field::new(&data);
        assert_eq!(field.render("all", true), field.render("all", true));
    }

    #[test]
    fn test_render_integer_values() {
        let value = 5u64.to_le_bytes();
        let field = Field::new(&value);
        let out = field.render("len", true);
        assert!(out.ends_with("\nInteger values = 5\n"));
    }

    #[test]
    fn test_render_skips_integers_for_odd_lengths() {
        let field = Field::new(b"abc");
        assert!(!field.render("x", true).contains("Integer values"));
    }

    #[test]
    fn test_render_caps_and_wraps() {
        let data = vec![b'a'; 5000];
        let field = Field::new(&data);
        let out = field.render("big", false);
        let printed: usize = out.bytes().filter(|&b| b == b'a').count();
        assert_eq!(printed, PRINT_LIMIT);
        assert!(out.lines().all(|line| line.len() <= LINE_WIDTH));
    }
}
