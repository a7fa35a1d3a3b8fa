//! shellpane - an embeddable interactive shell console core
//!
//! shellpane runs an interactive shell (or any interactive subprocess) behind
//! a text display surface provided by the host application. It owns the
//! process channel, interprets the ANSI color subset the subprocess emits,
//! and maintains the editing invariants of an interactive terminal.
//!
//! # Features
//!
//! - **PTY and pipe channels**: a real pseudo-terminal where the platform
//!   supports it, anonymous pipes as a best-effort fallback
//! - **Protected output region**: everything already printed is read-only;
//!   only the live command line accepts edits
//! - **ANSI color styling**: SGR foreground/background colors become named
//!   styles on the display surface; everything else is stripped
//! - **Command history**: bounded recall ring driven by Up/Down
//! - **Cooperative driver**: a single `poll_once` tick, no reader thread,
//!   suitable for a UI event loop
//!
//! # Quick start
//!
//! ```no_run
//! use shellpane::{Config, Session};
//! # use shellpane::display::DisplaySurface;
//! # fn demo<D: DisplaySurface>(surface: D) -> anyhow::Result<()> {
//! let mut session = Session::spawn(Config::load(), surface)?;
//! loop {
//!     // host idle tick
//!     session.poll_once();
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The host implements [`display::DisplaySurface`] over its own text widget
//! and forwards key events to [`Session::handle_key`]. Offsets in the
//! display contract are byte offsets into the UTF-8 buffer.

pub mod config;
pub mod core;
pub mod display;
pub mod history;
pub mod input;
pub mod logging;

pub use crate::config::{ChannelPreference, Config};
pub use crate::core::channel::{ChannelError, ChannelMode, ProcessChannel};
pub use crate::core::session::Session;
pub use crate::display::{DisplaySurface, StyleId};
