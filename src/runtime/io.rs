use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

/// Where program output goes and where `INPUT` reads from.
///
/// Nested module runs receive the same bridge, so output from every depth
/// lands in one stream in program order.
pub trait HostIo {
    fn emit(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn emit_line(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.emit(bytes)?;
        self.emit(b"\n")
    }

    /// One line without its terminator, `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Process stdout/stdin.
#[derive(Debug, Default)]
pub struct StdIo;

impl HostIo for StdIo {
    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(bytes)?;
        out.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// In-memory bridge: captures output, serves scripted input lines.
#[derive(Debug, Default)]
pub struct BufferIo {
    output: Vec<u8>,
    input: VecDeque<String>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            output: Vec::new(),
            input: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl HostIo for BufferIo {
    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.input.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_captures_output() {
        let mut io = BufferIo::new();
        io.emit(b"ab").unwrap();
        io.emit_line(b"c").unwrap();
        assert_eq!(io.output(), b"abc\n");
        assert_eq!(io.output_string(), "abc\n");
    }

    #[test]
    fn test_buffer_serves_input_in_order() {
        let mut io = BufferIo::with_input(["12", "x"]);
        assert_eq!(io.read_line().unwrap().as_deref(), Some("12"));
        assert_eq!(io.read_line().unwrap().as_deref(), Some("x"));
        assert_eq!(io.read_line().unwrap(), None);
    }
}
