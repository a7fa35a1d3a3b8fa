//! Prompt boundary and input gating.
//!
//! The boundary is the offset below which the buffer is already-printed
//! terminal output and therefore read-only. `InputGate::dispatch` turns a
//! key event plus the current caret/boundary/selection geometry into a
//! gate action; the session applies the action. Dispatch is pure so the
//! whole key policy can be table-tested.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// The earliest editable offset in the display buffer.
///
/// Only ever increased by output completion or prompt emission; reset to
/// zero solely by an explicit screen clear.
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptBoundary {
    offset: usize,
}

impl PromptBoundary {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the boundary forward. Backward moves are ignored.
    pub fn advance_to(&mut self, offset: usize) {
        if offset > self.offset {
            self.offset = offset;
        }
    }

    /// Screen clear: the one operation allowed to move the boundary back.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Whether an edit starting at `offset` is allowed.
    pub fn permits(&self, offset: usize) -> bool {
        offset >= self.offset
    }
}

/// What the session should do with a key event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    /// Enter: capture and submit the live line.
    Execute,
    /// Up: recall an older history entry into the live line.
    RecallPrev,
    /// Down: recall a newer history entry (or the empty live line).
    RecallNext,
    /// Ctrl-C with no selection: send the interrupt byte.
    Interrupt,
    /// Home: caret to the first editable column.
    JumpToBoundary,
    /// Insert a character at the caret (or over the selection).
    Insert(char),
    /// Delete backward from the caret (or the selection).
    Backspace,
    /// Delete forward from the caret (or the selection).
    Delete,
    /// Reject the keystroke entirely; it targets the protected region.
    Swallow,
    /// Not our concern; let the host's default handling run.
    Pass,
}

/// Pure key policy over the boundary invariant.
pub struct InputGate;

impl InputGate {
    /// Decide what to do with `event` given the current geometry.
    ///
    /// `selection` is the active selection range, if any; an edit whose
    /// effective start falls below `boundary` is swallowed, never applied.
    pub fn dispatch(
        event: &KeyEvent,
        caret: usize,
        boundary: usize,
        selection: Option<(usize, usize)>,
    ) -> GateAction {
        let mods = Modifiers::from(event.modifiers);
        let edit_start = selection.map(|(start, _)| start).unwrap_or(caret);

        match event.code {
            KeyCode::Enter => GateAction::Execute,

            KeyCode::Up if mods.is_empty() => GateAction::RecallPrev,
            KeyCode::Down if mods.is_empty() => GateAction::RecallNext,

            KeyCode::Home if mods.is_empty() => GateAction::JumpToBoundary,

            KeyCode::Char('c') if mods == Modifiers::CTRL => {
                if selection.is_some() {
                    // Copy shortcut territory; not an interrupt.
                    GateAction::Pass
                } else {
                    GateAction::Interrupt
                }
            }

            KeyCode::Char(ch) if !mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) => {
                if edit_start < boundary {
                    GateAction::Swallow
                } else {
                    GateAction::Insert(ch)
                }
            }

            KeyCode::Backspace => {
                let limit = if selection.is_some() { boundary } else { boundary + 1 };
                if edit_start < limit {
                    GateAction::Swallow
                } else {
                    GateAction::Backspace
                }
            }

            KeyCode::Delete => {
                if edit_start < boundary {
                    GateAction::Swallow
                } else {
                    GateAction::Delete
                }
            }

            _ => GateAction::Pass,
        }
    }
}
