//! Display surface contract.
//!
//! The host application renders the console; this crate only needs a
//! scrollable, styled text canvas. All offsets are byte offsets into the
//! surface's UTF-8 buffer.

use crossterm::style::Color;

/// Identifier for a named style defined on the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StyleId(pub usize);

/// Operations the session needs from the host's text canvas.
pub trait DisplaySurface {
    /// Append text at the end of the buffer.
    fn append_text(&mut self, text: &str);

    /// Offset one past the last byte of the buffer.
    fn end_offset(&self) -> usize;

    /// Text in `[start, end)`.
    fn text_range(&self, start: usize, end: usize) -> String;

    /// Current caret offset.
    fn caret(&self) -> usize;

    fn set_caret(&mut self, offset: usize);

    /// Define a named style. Called at most once per id; `None` keeps the
    /// surface default for that attribute.
    fn define_style(&mut self, id: StyleId, fg: Option<Color>, bg: Option<Color>);

    /// Apply a previously defined style over `[start, end)`.
    fn apply_style(&mut self, id: StyleId, start: usize, end: usize);

    /// Replace `[start, end)` with `text`.
    fn replace_range(&mut self, start: usize, end: usize, text: &str);

    /// Active selection range, if the surface supports selection.
    fn selection(&self) -> Option<(usize, usize)> {
        None
    }
}
