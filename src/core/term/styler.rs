//! ANSI SGR color styling.
//!
//! Scans a line for the color subset of SGR escape sequences
//! (`ESC [ 30..37 m` foreground, `ESC [ 40..47 m` background,
//! `ESC [ m` / `ESC [ 0 m` reset), strips the escape bytes and reports
//! style spans over the stripped text. Any other escape sequence is
//! stripped without interpretation.

use std::collections::HashMap;

use crossterm::style::Color;
use tracing::debug;

use crate::display::{DisplaySurface, StyleId};

const ESC: u8 = 0x1b;

/// The eight standard ANSI colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnsiColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

/// Palette index table, in SGR code order.
const PALETTE: [AnsiColor; 8] = [
    AnsiColor::Black,
    AnsiColor::Red,
    AnsiColor::Green,
    AnsiColor::Yellow,
    AnsiColor::Blue,
    AnsiColor::Magenta,
    AnsiColor::Cyan,
    AnsiColor::White,
];

impl AnsiColor {
    /// Palette index (0..8).
    pub fn index(self) -> u8 {
        PALETTE.iter().position(|&c| c == self).unwrap_or(7) as u8
    }

    /// Convert to the display color vocabulary.
    pub fn to_color(self) -> Color {
        Color::AnsiValue(self.index())
    }
}

/// A foreground/background color pair extracted from escape sequences.
///
/// Keys identify styles in the registry; `None` means "leave the surface
/// default in place".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StyleKey {
    pub fg: Option<AnsiColor>,
    pub bg: Option<AnsiColor>,
}

impl StyleKey {
    pub fn fg(color: AnsiColor) -> Self {
        Self {
            fg: Some(color),
            bg: None,
        }
    }

    /// Style used for stderr lines merged in from a pipe channel.
    pub fn error() -> Self {
        Self::fg(AnsiColor::Red)
    }

    fn apply_code(&mut self, code: u8) {
        match code {
            30..=37 => self.fg = Some(PALETTE[(code - 30) as usize]),
            40..=47 => self.bg = Some(PALETTE[(code - 40) as usize]),
            _ => {}
        }
    }
}

/// Result of stripping one line: clean text plus style spans over it.
///
/// Span offsets are byte offsets into `text`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrippedLine {
    pub text: String,
    pub spans: Vec<(usize, usize, StyleKey)>,
}

/// Allocates display style ids for color pairs, one per distinct pair for
/// the life of the session. The surface is asked to define each style
/// exactly once, at allocation time.
#[derive(Default)]
pub struct StyleRegistry {
    map: HashMap<StyleKey, StyleId>,
    next_id: usize,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id for `key`, allocating and defining it on first use.
    pub fn resolve<D: DisplaySurface>(&mut self, key: StyleKey, surface: &mut D) -> StyleId {
        if let Some(&id) = self.map.get(&key) {
            return id;
        }
        let id = StyleId(self.next_id);
        self.next_id += 1;
        surface.define_style(
            id,
            key.fg.map(AnsiColor::to_color),
            key.bg.map(AnsiColor::to_color),
        );
        self.map.insert(key, id);
        id
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// SGR color scanner.
pub struct AnsiStyler;

impl AnsiStyler {
    /// Strip escape sequences from `line` and report color spans.
    ///
    /// Stripping is idempotent: output text never contains the escape
    /// marker, so a second pass returns it unchanged with no spans.
    pub fn strip(line: &str) -> StrippedLine {
        // Fast path: nothing to scan.
        if !line.as_bytes().contains(&ESC) {
            return StrippedLine {
                text: line.to_string(),
                spans: Vec::new(),
            };
        }

        let bytes = line.as_bytes();
        let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
        let mut spans: Vec<(usize, usize, StyleKey)> = Vec::new();
        // Open styled run: key plus start offset in the stripped output.
        let mut run: Option<(StyleKey, usize)> = None;

        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != ESC {
                out.push(bytes[i]);
                i += 1;
                continue;
            }

            if let Some(len) = match_reset(&bytes[i..]) {
                if let Some((key, start)) = run.take() {
                    if out.len() > start {
                        spans.push((start, out.len(), key));
                    }
                }
                i += len;
                continue;
            }

            if let Some((key, len)) = match_introducers(&bytes[i..]) {
                if run.is_some() {
                    // A second introducer inside an open run has no pattern
                    // match; strip it and keep the run.
                    debug!("color introducer inside open styled run, stripped");
                } else {
                    run = Some((key, out.len()));
                }
                i += len;
                continue;
            }

            let skipped = skip_escape(&bytes[i..]);
            debug!(
                "stripped unrecognized escape sequence ({} bytes)",
                skipped
            );
            i += skipped;
        }

        // An unterminated run never matched; its introducers are already
        // stripped and no span is emitted.
        if run.is_some() {
            debug!("styled run without reset at end of line");
        }

        // Pinned quirk: a span starting on whitespace is nudged forward one
        // position so the style never covers a user-typed leading space
        // when later applied against the live buffer.
        for span in &mut spans {
            if span.0 < span.1 && out[span.0].is_ascii_whitespace() {
                span.0 += 1;
            }
        }

        StrippedLine {
            text: String::from_utf8_lossy(&out).into_owned(),
            spans,
        }
    }
}

/// Match `ESC [ m` or `ESC [ 0 m`.
fn match_reset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() >= 3 && bytes[0] == ESC && bytes[1] == b'[' && bytes[2] == b'm' {
        return Some(3);
    }
    if bytes.len() >= 4
        && bytes[0] == ESC
        && bytes[1] == b'['
        && bytes[2] == b'0'
        && bytes[3] == b'm'
    {
        return Some(4);
    }
    None
}

/// Match a single color introducer `ESC [ NN m`, NN in 30..37 or 40..47.
fn match_color_introducer(bytes: &[u8]) -> Option<(u8, usize)> {
    if bytes.len() < 5 || bytes[0] != ESC || bytes[1] != b'[' || bytes[4] != b'm' {
        return None;
    }
    if !bytes[2].is_ascii_digit() || !bytes[3].is_ascii_digit() {
        return None;
    }
    let code = (bytes[2] - b'0') * 10 + (bytes[3] - b'0');
    match code {
        30..=37 | 40..=47 => Some((code, 5)),
        _ => None,
    }
}

/// Match one-or-two consecutive color introducers and fold their codes
/// into a single style key.
fn match_introducers(bytes: &[u8]) -> Option<(StyleKey, usize)> {
    let (first, mut len) = match_color_introducer(bytes)?;
    let mut key = StyleKey::default();
    key.apply_code(first);
    if let Some((second, second_len)) = match_color_introducer(&bytes[len..]) {
        key.apply_code(second);
        len += second_len;
    }
    Some((key, len))
}

/// Length of an unrecognized escape sequence to strip. CSI sequences are
/// skipped through their final byte; other escapes drop the marker plus
/// one byte. Pathological input may leak literal bytes through, which is
/// the accepted fallback.
fn skip_escape(bytes: &[u8]) -> usize {
    if bytes.len() >= 2 && bytes[1] == b'[' {
        for (offset, &b) in bytes.iter().enumerate().skip(2) {
            if (0x40..=0x7e).contains(&b) {
                return offset + 1;
            }
        }
        return bytes.len();
    }
    2.min(bytes.len())
}
