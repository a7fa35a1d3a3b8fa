//! Burst line processing.
//!
//! Turns one decoded burst of child output into an ordered list of lines
//! ready for styling: splits on the line separator, drops the trailing
//! separator artifact, suppresses the echoed command on pipe channels and
//! merges pending stderr text ahead of the stdout lines.

use crate::core::channel::ChannelMode;

/// Line separator written after each submitted command.
pub const LINE_SEPARATOR: &str = "\n";

/// Which stream a processed line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Output,
    Error,
}

/// One line of a processed burst.
#[derive(Clone, Debug, PartialEq)]
pub struct SourcedLine {
    pub kind: LineKind,
    pub text: String,
}

impl SourcedLine {
    fn output(text: String) -> Self {
        Self {
            kind: LineKind::Output,
            text,
        }
    }

    fn error(text: String) -> Self {
        Self {
            kind: LineKind::Error,
            text,
        }
    }
}

/// A processed burst. `terminated` records whether the raw burst ended on
/// a line separator; an unterminated tail is still flushed as a line, with
/// no buffering across bursts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Burst {
    pub lines: Vec<SourcedLine>,
    pub terminated: bool,
}

/// Splits bursts into lines and scrubs channel artifacts.
pub struct LineProcessor {
    mode: ChannelMode,
    /// Command awaiting echo suppression (pipe mode only).
    pending_echo: Option<String>,
}

impl LineProcessor {
    pub fn new(mode: ChannelMode) -> Self {
        Self {
            mode,
            pending_echo: None,
        }
    }

    /// Record the command just submitted so its echo can be dropped from
    /// the next burst. PTY channels run with local echo disabled, so there
    /// is nothing to suppress there.
    pub fn note_command(&mut self, command: &str) {
        if self.mode == ChannelMode::Pipe && !command.is_empty() {
            self.pending_echo = Some(command.to_string());
        }
    }

    /// Process one decoded burst plus any stderr lines captured alongside it.
    pub fn process(&mut self, raw: &str, error_lines: Vec<String>) -> Burst {
        let terminated = raw.ends_with('\n');

        let mut lines: Vec<String> = raw
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();

        // Trailing separator artifact: split leaves one empty line behind.
        if terminated && lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }

        // Echo suppression: pipe channels repeat the submitted command as
        // the first line of the response.
        if self.mode == ChannelMode::Pipe {
            if let Some(echo) = self.pending_echo.take() {
                match lines.first() {
                    Some(first) if first.contains(&echo) => {
                        lines.remove(0);
                    }
                    _ => self.pending_echo = Some(echo),
                }
            }
        }

        let mut out: Vec<SourcedLine> =
            error_lines.into_iter().map(SourcedLine::error).collect();
        out.extend(lines.into_iter().map(SourcedLine::output));

        Burst {
            lines: out,
            terminated,
        }
    }
}
