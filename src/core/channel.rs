//! Process channel abstraction.
//!
//! A `ProcessChannel` owns one interactive child process and exposes a
//! uniform byte channel over it. Two implementations exist: `PtyChannel`
//! (pseudo-terminal, raw mode, no local echo) and `PipeChannel` (anonymous
//! pipes, best effort). The session picks one at construction time; nothing
//! downstream branches on the platform again.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Interrupt byte used when the channel cannot query the terminal (ETX).
pub const DEFAULT_INTERRUPT_BYTE: u8 = 0x03;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to allocate pty: {0}")]
    PtyAllocation(#[source] io::Error),

    #[error("failed to spawn shell process: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to read from channel: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write to channel: {0}")]
    Write(#[source] io::Error),

    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Spawn-time failures are fatal to session construction; everything
    /// else is a runtime death the session recovers from locally.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, ChannelError::PtyAllocation(_) | ChannelError::Spawn(_))
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// How the channel talks to the child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    /// Pseudo-terminal: raw mode, no local echo, real interrupt delivery.
    Pty,
    /// Anonymous pipes: the child echoes commands back and signals are
    /// advisory only.
    Pipe,
}

/// Byte channel over one interactive child process.
///
/// Reads are poll-based and bounded by the given timeout; an empty result
/// means the child produced nothing within it. Writes are best effort: a
/// broken pipe surfaces as an error once, after which the channel reports
/// itself dead and further I/O becomes a no-op.
pub trait ProcessChannel {
    /// Read up to one chunk of output, waiting at most `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Write raw bytes to the child's input.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Kill the child and release descriptors. Idempotent; safe to call on
    /// an already-exited channel.
    fn terminate(&mut self);

    /// The control byte to send for Ctrl-C.
    fn interrupt_byte(&self) -> u8;

    fn mode(&self) -> ChannelMode;

    /// Drain any pending stderr text (pipe mode only).
    fn drain_errors(&mut self) -> Vec<String> {
        Vec::new()
    }
}
