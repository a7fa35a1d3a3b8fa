//! Anonymous-pipe channel.
//!
//! Fallback for targets where a PTY cannot be allocated. The child gets
//! separate stdin/stdout/stderr pipes; no raw-mode configuration is
//! possible, so the child echoes commands back and the interrupt byte is
//! advisory only. Best effort by construction.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

use super::channel::{ChannelError, ChannelMode, ProcessChannel, Result, DEFAULT_INTERRUPT_BYTE};
use super::pty::set_nonblocking;

/// Pipes deliver buffered output in larger blocks than a PTY, so a bigger
/// read quantum costs nothing in interactivity.
const READ_CHUNK: usize = 4096;

/// Pipe-backed process channel.
pub struct PipeChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    exited: bool,
}

impl PipeChannel {
    pub fn spawn(shell: &str) -> Result<Self> {
        let mut child = Command::new(shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ChannelError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ChannelError::Closed)?;
        let stdout = child.stdout.take().ok_or(ChannelError::Closed)?;
        let stderr = child.stderr.take().ok_or(ChannelError::Closed)?;

        set_nonblocking(&stdout).map_err(|e| ChannelError::Spawn(io::Error::from(e)))?;
        set_nonblocking(&stderr).map_err(|e| ChannelError::Spawn(io::Error::from(e)))?;

        debug!("spawned {} on pipes, pid {}", shell, child.id());

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
            exited: false,
        })
    }

    fn mark_exited(&mut self) {
        if !self.exited {
            debug!("pipe channel: child {} gone", self.child.id());
            self.exited = true;
        }
    }
}

impl ProcessChannel for PipeChannel {
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.exited {
            return Ok(Vec::new());
        }

        let mut fds = [PollFd::new(self.stdout.as_fd(), PollFlags::POLLIN)];
        let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => {
                self.mark_exited();
                return Err(ChannelError::Read(io::Error::from(e)));
            }
        }

        let mut buffer = [0u8; READ_CHUNK];
        match self.stdout.read(&mut buffer) {
            Ok(0) => {
                self.mark_exited();
                Ok(Vec::new())
            }
            Ok(n) => Ok(buffer[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => {
                self.mark_exited();
                Err(ChannelError::Read(e))
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        match self.stdin.write_all(bytes).and_then(|_| self.stdin.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_exited();
                Err(ChannelError::Write(e))
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("pipe channel: child exited with {}", status);
                self.exited = true;
                false
            }
            Err(e) => {
                warn!("try_wait failed: {}", e);
                self.exited = true;
                false
            }
        }
    }

    fn terminate(&mut self) {
        if self.exited {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!("kill failed: {}", e);
        }
        let _ = self.child.wait();
        self.exited = true;
    }

    fn interrupt_byte(&self) -> u8 {
        DEFAULT_INTERRUPT_BYTE
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::Pipe
    }

    fn drain_errors(&mut self) -> Vec<String> {
        if self.exited {
            return Vec::new();
        }

        let mut captured = Vec::new();
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            let mut fds = [PollFd::new(self.stderr.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match self.stderr.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => captured.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        if captured.is_empty() {
            return Vec::new();
        }
        String::from_utf8_lossy(&captured)
            .lines()
            .map(|line| line.to_string())
            .collect()
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_round_trip() {
        let mut channel = PipeChannel::spawn("/bin/sh").expect("pipe spawn");
        channel.write(b"echo hello\n").expect("write");

        let mut collected = Vec::new();
        for _ in 0..50 {
            let chunk = channel.read(Duration::from_millis(50)).expect("read");
            collected.extend_from_slice(&chunk);
            if collected.windows(5).any(|w| w == b"hello") {
                break;
            }
        }
        assert!(
            collected.windows(5).any(|w| w == b"hello"),
            "expected echoed output, got {:?}",
            String::from_utf8_lossy(&collected)
        );
        channel.terminate();
    }

    #[test]
    fn stderr_is_drained_separately() {
        let mut channel = PipeChannel::spawn("/bin/sh").expect("pipe spawn");
        channel.write(b"echo oops 1>&2\n").expect("write");

        let mut errors = Vec::new();
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(20));
            errors = channel.drain_errors();
            if !errors.is_empty() {
                break;
            }
        }
        assert!(errors.iter().any(|line| line.contains("oops")));
        channel.terminate();
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut channel = PipeChannel::spawn("/bin/sh").expect("pipe spawn");
        channel.terminate();
        channel.terminate();
        assert!(!channel.is_alive());
        assert!(channel.write(b"ignored\n").is_ok());
    }
}
