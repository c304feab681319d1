//! Recorded test traffic and diagnostic section dumps
//!
//! Test input is a line-oriented script. Lines starting with `$` are
//! commands, lines starting with `#` are comments, every other line is
//! message data and gets a CR LF appended:
//!
//! ```text
//! $test 3          start test case 3
//! $client          following data flows client to server
//! $server          following data flows server to client
//! $section         deliver what is pending as one chunk
//! $close           deliver what is pending with end of stream
//! $fill 1000       append 1000 'A' octets
//! ```
//!
//! Data lines understand `\r`, `\n`, `\t`, `\\` and `\xHH`. A line ending
//! in a lone `\` gets no CR LF.

use crate::config::TestSettings;
use crate::error::{InspectError, InspectResult};
use crate::flow::SourceId;
use crate::section::MessageSection;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One step of a recorded test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStep {
    /// A new test case begins
    Begin(i64),
    /// A chunk to hand to the inspector
    Chunk {
        source: SourceId,
        data: Vec<u8>,
        end_of_stream: bool,
    },
}

/// Parsed test input script
#[derive(Debug, Clone, Default)]
pub struct TestInput {
    steps: Vec<TestStep>,
}

struct ScriptParser {
    steps: Vec<TestStep>,
    source: SourceId,
    pending: Vec<u8>,
}

impl ScriptParser {
    fn flush(&mut self, end_of_stream: bool) {
        if self.pending.is_empty() && !end_of_stream {
            return;
        }
        self.steps.push(TestStep::Chunk {
            source: self.source,
            data: std::mem::take(&mut self.pending),
            end_of_stream,
        });
    }

    fn command(&mut self, line_no: usize, command: &str) -> InspectResult<()> {
        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();
        match name {
            "test" => {
                let number = number_arg(line_no, name, arg)?;
                self.flush(false);
                self.steps.push(TestStep::Begin(number));
            }
            "client" => {
                self.flush(false);
                self.source = SourceId::Client;
            }
            "server" => {
                self.flush(false);
                self.source = SourceId::Server;
            }
            "section" => self.flush(false),
            "close" => self.flush(true),
            "fill" => {
                let count = number_arg(line_no, name, arg)?;
                let count = usize::try_from(count).map_err(|_| InspectError::TestInput {
                    line: line_no,
                    message: format!("negative fill count {}", count),
                })?;
                self.pending.resize(self.pending.len() + count, b'A');
            }
            other => {
                return Err(InspectError::TestInput {
                    line: line_no,
                    message: format!("unknown command ${}", other),
                })
            }
        }
        Ok(())
    }
}

fn number_arg(line_no: usize, command: &str, arg: Option<&str>) -> InspectResult<i64> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| InspectError::TestInput {
            line: line_no,
            message: format!("${} needs a number", command),
        })
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|v| v as u8)
}

/// Decodes escapes in one data line. Returns the octets and whether the
/// line asked to suppress the trailing CR LF.
fn decode_line(line_no: usize, line: &[u8]) -> InspectResult<(Vec<u8>, bool)> {
    let mut out = Vec::with_capacity(line.len() + 2);
    let mut i = 0;
    while i < line.len() {
        if line[i] != b'\\' {
            out.push(line[i]);
            i += 1;
            continue;
        }
        let Some(&escape) = line.get(i + 1) else {
            return Ok((out, true));
        };
        match escape {
            b'r' => out.push(b'\r'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'x' => {
                let value = line
                    .get(i + 2)
                    .and_then(|&h| hex_value(h))
                    .zip(line.get(i + 3).and_then(|&l| hex_value(l)))
                    .map(|(h, l)| h << 4 | l)
                    .ok_or_else(|| InspectError::TestInput {
                        line: line_no,
                        message: "\\x needs two hex digits".to_string(),
                    })?;
                out.push(value);
                i += 4;
                continue;
            }
            other => {
                return Err(InspectError::TestInput {
                    line: line_no,
                    message: format!("unknown escape \\{}", other as char),
                })
            }
        }
        i += 2;
    }
    Ok((out, false))
}

impl TestInput {
    pub fn parse(script: &str) -> InspectResult<Self> {
        let mut parser = ScriptParser {
            steps: Vec::new(),
            source: SourceId::Client,
            pending: Vec::new(),
        };

        for (index, line) in script.lines().enumerate() {
            let line_no = index + 1;
            if line.starts_with('#') {
                continue;
            }
            if let Some(command) = line.strip_prefix('$') {
                parser.command(line_no, command)?;
                continue;
            }
            let (data, no_crlf) = decode_line(line_no, line.as_bytes())?;
            parser.pending.extend_from_slice(&data);
            if !no_crlf {
                parser.pending.extend_from_slice(b"\r\n");
            }
        }
        parser.flush(false);

        Ok(Self {
            steps: parser.steps,
        })
    }

    pub fn from_file(path: &Path) -> InspectResult<Self> {
        let script = std::fs::read_to_string(path)?;
        Self::parse(&script)
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl IntoIterator for TestInput {
    type Item = TestStep;
    type IntoIter = std::vec::IntoIter<TestStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

/// Writes a dump of every analyzed section.
///
/// Until a test number is set, dumps go to stdout. Afterwards each test
/// case gets its own `{prefix}{number}.txt` file.
#[derive(Debug)]
pub struct TestOutput {
    prefix: String,
    test_number: Option<i64>,
    file: Option<(i64, BufWriter<File>)>,
}

impl TestOutput {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            test_number: None,
            file: None,
        }
    }

    pub fn from_settings(settings: &TestSettings) -> Self {
        Self::new(settings.output_prefix.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn test_number(&self) -> Option<i64> {
        self.test_number
    }

    pub fn set_test_number(&mut self, number: i64) {
        self.test_number = Some(number);
    }

    /// Path of the dump file for a test case
    pub fn path_for(&self, number: i64) -> PathBuf {
        PathBuf::from(format!("{}{}.txt", self.prefix, number))
    }

    fn writer(&mut self, number: i64) -> InspectResult<&mut BufWriter<File>> {
        if let Some((current, mut old)) = self.file.take() {
            if current == number {
                return Ok(&mut self.file.insert((current, old)).1);
            }
            old.flush()?;
        }
        let path = self.path_for(number);
        let file = File::create(&path).map_err(|source| InspectError::TestOutput {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Opened test output");
        Ok(&mut self.file.insert((number, BufWriter::new(file))).1)
    }

    pub fn record(&mut self, section: &MessageSection<'_>) -> InspectResult<()> {
        match self.test_number {
            None => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                section.print_section(&mut out)?;
            }
            Some(number) => {
                let out = self.writer(number)?;
                section.print_section(out)?;
                debug!("Finished processing section from test {}", number);
            }
        }
        Ok(())
    }

    /// Flushes the open dump file
    pub fn finish(&mut self) -> InspectResult<()> {
        if let Some((_, file)) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for TestOutput {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowData;
    use tempfile::TempDir;

    #[test]
    fn test_parse_script() {
        let input = TestInput::parse(
            "# pipelined pair\n$test 7\nGET / HTTP/1.1\nHost: x\n\n$server\nHTTP/1.1 200 OK\\r\\n\\\n$close\n",
        )
        .unwrap();
        let steps = input.steps();
        assert_eq!(steps[0], TestStep::Begin(7));
        assert_eq!(
            steps[1],
            TestStep::Chunk {
                source: SourceId::Client,
                data: b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
                end_of_stream: false,
            }
        );
        assert_eq!(
            steps[2],
            TestStep::Chunk {
                source: SourceId::Server,
                data: b"HTTP/1.1 200 OK\r\n".to_vec(),
                end_of_stream: true,
            }
        );
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn test_fill_and_escapes() {
        let input = TestInput::parse("\\x41\\t\\\\\\\n$fill 3\n$section").unwrap();
        assert_eq!(
            input.steps(),
            &[TestStep::Chunk {
                source: SourceId::Client,
                data: b"A\t\\AAA".to_vec(),
                end_of_stream: false,
            }]
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = TestInput::parse("ok\n$fill many\n").unwrap_err();
        assert!(matches!(err, InspectError::TestInput { line: 2, .. }));
        assert!(TestInput::parse("\\xZZ").is_err());
        assert!(TestInput::parse("\\q").is_err());
        assert!(TestInput::parse("$launch").is_err());
    }

    #[test]
    fn test_close_without_data() {
        let input = TestInput::parse("$server\n$close\n").unwrap();
        assert_eq!(
            input.steps(),
            &[TestStep::Chunk {
                source: SourceId::Server,
                data: Vec::new(),
                end_of_stream: true,
            }]
        );
    }

    #[test]
    fn test_output_per_test_file() {
        let dir = TempDir::new().unwrap();
        let prefix = format!("{}/nhttp_out_", dir.path().display());
        let mut output = TestOutput::new(prefix);

        let mut flow = FlowData::new(8);
        let raw = b"GET / HTTP/1.1\r\n";
        let mut section = MessageSection::new(
            crate::flow::SectionType::Request,
            raw,
            SourceId::Client,
            false,
            &flow,
        )
        .unwrap();
        let mut events = Vec::new();
        let mut buffers = crate::buffers::DetectionBuffers::default();
        let settings = crate::config::InspectSettings::default();
        section.run(&mut crate::section::SectionContext {
            flow: &mut flow,
            settings: &settings,
            events: &mut events,
            buffers: &mut buffers,
        });

        output.set_test_number(1);
        output.record(&section).unwrap();
        output.set_test_number(2);
        output.record(&section).unwrap();
        output.finish().unwrap();

        let first = std::fs::read_to_string(output.path_for(1)).unwrap();
        assert!(first.starts_with("HTTP message request:"));
        assert!(first.contains("TCP close: false"));
        assert!(output.path_for(2).exists());
    }

    #[test]
    fn test_output_unwritable_prefix() {
        let mut output = TestOutput::new("/nonexistent-dir/hsi/out_");
        let flow = FlowData::new(8);
        let section = MessageSection::new(
            crate::flow::SectionType::Request,
            b"GET / HTTP/1.1\r\n",
            SourceId::Client,
            false,
            &flow,
        )
        .unwrap();
        output.set_test_number(1);
        let err = output.record(&section).unwrap_err();
        assert!(matches!(err, InspectError::TestOutput { .. }));
    }
}
