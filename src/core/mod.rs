//! Core terminal emulation components.
//!
//! This module contains the low-level terminal emulation logic:
//!
//! - **channel**: the `ProcessChannel` seam over the child process
//! - **pty**: Unix pseudo-terminal channel (raw mode, no local echo)
//! - **pipe**: anonymous-pipe channel for targets without PTY support
//! - **term**: line splitting and ANSI SGR styling
//! - **session**: high-level session combining channel + styling + input
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── ProcessChannel (PtyChannel | PipeChannel)
//! ├── CommandHistory
//! ├── PromptBoundary
//! ├── StyleRegistry
//! └── DisplaySurface (host-provided)
//! ```

pub mod channel;
#[cfg(unix)]
pub mod pipe;
#[cfg(unix)]
pub mod pty;
pub mod session;
pub mod term;
