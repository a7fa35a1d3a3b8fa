//! Burst text processing: line splitting and ANSI SGR styling.

pub mod lines;
pub mod styler;

pub use lines::{Burst, LineKind, LineProcessor, SourcedLine};
pub use styler::{AnsiColor, AnsiStyler, StrippedLine, StyleKey, StyleRegistry};
