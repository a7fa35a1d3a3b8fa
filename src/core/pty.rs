//! Unix pseudo-terminal channel.
//!
//! Allocates a PTY pair, configures the slave end into raw mode (no
//! canonical processing, no local echo, 1-byte reads) and spawns the shell
//! as a session leader with the slave as its controlling terminal. The
//! master descriptor serves as both read and write channel.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, SpecialCharacterIndices};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::channel::{ChannelError, ChannelMode, ProcessChannel, Result, DEFAULT_INTERRUPT_BYTE};

/// Read quantum for PTY output. Kept small so interactive output is
/// delivered promptly instead of waiting for a large buffer to fill.
const READ_CHUNK: usize = 32;

/// PTY-backed process channel.
#[derive(Debug)]
pub struct PtyChannel {
    master: OwnedFd,
    pid: Pid,
    interrupt_byte: u8,
    exited: bool,
}

impl PtyChannel {
    /// Allocate a PTY and spawn `shell` with the login flag on the slave end.
    pub fn spawn(shell: &str) -> Result<Self> {
        let winsize = Winsize {
            ws_row: 24,
            ws_col: 80,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(&winsize, None)
            .map_err(|e| ChannelError::PtyAllocation(io::Error::from(e)))?;

        // Raw mode on the slave: no canonical buffering, no local echo,
        // 1-byte minimum read, no timeout.
        let mut termios = tcgetattr(&pty.slave)
            .map_err(|e| ChannelError::PtyAllocation(io::Error::from(e)))?;
        cfmakeraw(&mut termios);
        termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(&pty.slave, SetArg::TCSANOW, &termios)
            .map_err(|e| ChannelError::PtyAllocation(io::Error::from(e)))?;
        let interrupt_byte = termios.control_chars[SpecialCharacterIndices::VINTR as usize];

        let slave_fd = pty.slave.as_raw_fd();
        let mut command = Command::new(shell);
        command.arg("-l");
        unsafe {
            command.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(slave_fd, 0) == -1
                    || libc::dup2(slave_fd, 1) == -1
                    || libc::dup2(slave_fd, 2) == -1
                {
                    return Err(io::Error::last_os_error());
                }
                if slave_fd > 2 {
                    libc::close(slave_fd);
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(ChannelError::Spawn)?;
        let pid = Pid::from_raw(child.id() as i32);
        drop(pty.slave);

        set_nonblocking(&pty.master).map_err(|e| ChannelError::PtyAllocation(io::Error::from(e)))?;

        debug!("spawned {} on pty, pid {}", shell, pid);

        Ok(Self {
            master: pty.master,
            pid,
            interrupt_byte: if interrupt_byte == 0 {
                DEFAULT_INTERRUPT_BYTE
            } else {
                interrupt_byte
            },
            exited: false,
        })
    }

    fn mark_exited(&mut self) {
        if !self.exited {
            debug!("pty channel: child {} gone", self.pid);
            self.exited = true;
        }
    }

    /// Reap the child without blocking longer than a short grace window.
    fn reap(&mut self) {
        for _ in 0..5 {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(_) | Err(Errno::ECHILD) => return,
                Err(e) => {
                    warn!("waitpid({}) failed: {}", self.pid, e);
                    return;
                }
            }
        }
        warn!("child {} did not exit within grace window", self.pid);
    }
}

impl ProcessChannel for PtyChannel {
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.exited {
            return Ok(Vec::new());
        }

        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
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
        match nix::unistd::read(self.master.as_raw_fd(), &mut buffer) {
            Ok(0) => {
                self.mark_exited();
                Ok(Vec::new())
            }
            Ok(n) => Ok(buffer[..n].to_vec()),
            Err(Errno::EAGAIN) => Ok(Vec::new()),
            // EIO is the normal read result once the slave side is closed.
            Err(Errno::EIO) => {
                self.mark_exited();
                Ok(Vec::new())
            }
            Err(e) => {
                self.mark_exited();
                Err(ChannelError::Read(io::Error::from(e)))
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.exited {
            return Ok(());
        }

        let mut written = 0;
        while written < bytes.len() {
            match nix::unistd::write(self.master.as_fd(), &bytes[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(e) => {
                    self.mark_exited();
                    return Err(ChannelError::Write(io::Error::from(e)));
                }
            }
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(_) | Err(_) => {
                self.mark_exited();
                false
            }
        }
    }

    fn terminate(&mut self) {
        if self.exited {
            return;
        }
        let _ = kill(self.pid, Signal::SIGKILL);
        self.reap();
        self.exited = true;
    }

    fn interrupt_byte(&self) -> u8 {
        self.interrupt_byte
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::Pty
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

pub(crate) fn set_nonblocking<Fd: AsFd>(fd: &Fd) -> nix::Result<()> {
    let flags = fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
