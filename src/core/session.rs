//! Session management.
//!
//! A `Session` ties one process channel to one display surface: it drains
//! quiescent bursts of child output through the line processor and styler,
//! maintains the prompt boundary, and applies gate actions from key input.
//!
//! The driver is cooperative: the host calls `poll_once` from its idle
//! tick. Each call drains at most one burst, so the host thread never
//! blocks longer than the configured poll timeout per read.

use crossterm::event::KeyEvent;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::channel::{ChannelError, ProcessChannel};
use crate::core::term::lines::LINE_SEPARATOR;
use crate::core::term::{AnsiStyler, Burst, LineKind, LineProcessor, StyleKey, StyleRegistry};
use crate::display::DisplaySurface;
use crate::history::CommandHistory;
use crate::input::{GateAction, InputGate, PromptBoundary};

#[cfg(unix)]
use crate::config::ChannelPreference;
#[cfg(unix)]
use crate::core::pipe::PipeChannel;
#[cfg(unix)]
use crate::core::pty::PtyChannel;

/// Marker appended to the display when the child process goes away.
const PROCESS_COMPLETE_MARKER: &str = "[process complete]";

/// Drain passes granted to an exit command before the child is killed.
const EXIT_GRACE_PASSES: usize = 5;

/// One interactive console session.
pub struct Session<D: DisplaySurface> {
    channel: Box<dyn ProcessChannel>,
    display: D,
    history: CommandHistory,
    boundary: PromptBoundary,
    styles: StyleRegistry,
    lines: LineProcessor,
    config: Config,
    exited: bool,
}

impl<D: DisplaySurface> Session<D> {
    /// Spawn the configured shell and wrap it in a session.
    ///
    /// Spawn failures are returned as-is; no partial session exists
    /// afterwards.
    #[cfg(unix)]
    pub fn spawn(config: Config, display: D) -> Result<Self, ChannelError> {
        let shell = config.resolve_shell();
        let channel: Box<dyn ProcessChannel> = match config.mode {
            ChannelPreference::Pty => Box::new(PtyChannel::spawn(&shell)?),
            ChannelPreference::Pipe => Box::new(PipeChannel::spawn(&shell)?),
            ChannelPreference::Auto => match PtyChannel::spawn(&shell) {
                Ok(pty) => Box::new(pty),
                Err(err @ ChannelError::PtyAllocation(_)) => {
                    warn!("pty allocation failed ({}), falling back to pipes", err);
                    Box::new(PipeChannel::spawn(&shell)?)
                }
                Err(err) => return Err(err),
            },
        };
        info!("session started: {} in {:?} mode", shell, channel.mode());
        Ok(Self::with_channel(channel, config, display))
    }

    /// Build a session over an existing channel. This is the seam test
    /// harnesses and custom hosts use.
    pub fn with_channel(channel: Box<dyn ProcessChannel>, config: Config, display: D) -> Self {
        let mode = channel.mode();
        Self {
            channel,
            display,
            history: CommandHistory::new(),
            boundary: PromptBoundary::default(),
            styles: StyleRegistry::new(),
            lines: LineProcessor::new(mode),
            config,
            exited: false,
        }
    }

    /// One driver tick. Returns whether any work was done.
    ///
    /// Drains one quiescent burst: reads accumulate until a read comes back
    /// empty, then the whole burst is processed at once so partial escape
    /// sequences inside it never reach the display.
    pub fn poll_once(&mut self) -> bool {
        if self.exited {
            return false;
        }

        let timeout = self.config.poll_timeout();
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match self.channel.read(timeout) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => pending.extend_from_slice(&chunk),
                Err(err) => {
                    debug!("channel read failed: {}", err);
                    break;
                }
            }
        }

        if pending.is_empty() {
            if !self.channel.is_alive() {
                self.finish_exit();
                return true;
            }
            return false;
        }

        let text = String::from_utf8_lossy(&pending).into_owned();
        let errors = self.channel.drain_errors();
        let burst = self.lines.process(&text, errors);
        self.render_burst(burst);

        // New prompt: everything printed so far becomes read-only and the
        // caret parks at the first editable column.
        self.boundary.advance_to(self.display.end_offset());
        self.display.set_caret(self.boundary.offset());

        if !self.channel.is_alive() {
            self.finish_exit();
        }
        true
    }

    /// Apply one key event. Returns whether the session consumed it;
    /// `false` means the host's default handling should run.
    pub fn handle_key(&mut self, event: &KeyEvent) -> bool {
        let caret = self.display.caret();
        let selection = self.display.selection();
        let action = InputGate::dispatch(event, caret, self.boundary.offset(), selection);

        if matches!(action, GateAction::Pass) {
            return false;
        }
        // A finished session keeps its buffer readable but rejects all
        // editing input.
        if self.exited {
            return true;
        }

        match action {
            GateAction::Execute => self.execute_line(),
            GateAction::RecallPrev => {
                if !self.history.is_empty() {
                    let entry = self.history.prev();
                    self.replace_live_line(&entry);
                }
            }
            GateAction::RecallNext => {
                let entry = self.history.next();
                self.replace_live_line(&entry);
            }
            GateAction::Interrupt => {
                let byte = self.channel.interrupt_byte();
                self.send(&[byte]);
            }
            GateAction::JumpToBoundary => {
                self.display.set_caret(self.boundary.offset());
            }
            GateAction::Insert(ch) => {
                let (start, end) = selection.unwrap_or((caret, caret));
                let mut buf = [0u8; 4];
                let encoded = ch.encode_utf8(&mut buf);
                self.display.replace_range(start, end, encoded);
                self.display.set_caret(start + encoded.len());
            }
            GateAction::Backspace => match selection {
                Some((start, end)) => {
                    self.display.replace_range(start, end, "");
                    self.display.set_caret(start);
                }
                None => {
                    let live = self.display.text_range(self.boundary.offset(), caret);
                    if let Some(ch) = live.chars().last() {
                        let start = caret - ch.len_utf8();
                        self.display.replace_range(start, caret, "");
                        self.display.set_caret(start);
                    }
                }
            },
            GateAction::Delete => match selection {
                Some((start, end)) => {
                    self.display.replace_range(start, end, "");
                    self.display.set_caret(start);
                }
                None => {
                    let end = self.display.end_offset();
                    if caret < end {
                        let rest = self.display.text_range(caret, end);
                        if let Some(ch) = rest.chars().next() {
                            self.display.replace_range(caret, caret + ch.len_utf8(), "");
                        }
                    }
                }
            },
            GateAction::Swallow => {}
            GateAction::Pass => unreachable!(),
        }
        true
    }

    /// Whether an edit starting at `offset` is allowed right now. Hosts
    /// route mouse-driven edits (paste, drag replace) through this.
    pub fn guard_edit(&self, offset: usize) -> bool {
        !self.exited && self.boundary.permits(offset)
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    pub fn boundary_offset(&self) -> usize {
        self.boundary.offset()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Capture the live line and run it.
    fn execute_line(&mut self) {
        let start = self.boundary.offset();
        let end = self.display.end_offset();
        let command = self.display.text_range(start, end);

        if self.config.is_clear_command(&command) {
            self.clear_screen();
            return;
        }

        self.display.append_text(LINE_SEPARATOR);
        self.boundary.advance_to(self.display.end_offset());
        self.display.set_caret(self.boundary.offset());

        self.history.push(&command);
        self.lines.note_command(self.history.last_executed());

        if self.config.is_exit_command(&command) {
            self.graceful_exit(&command);
            return;
        }

        let mut payload = command.into_bytes();
        payload.extend_from_slice(LINE_SEPARATOR.as_bytes());
        if self.send(&payload) {
            self.poll_once();
        }
    }

    /// Replace the editable region with `text` (history recall).
    fn replace_live_line(&mut self, text: &str) {
        let start = self.boundary.offset();
        let end = self.display.end_offset();
        self.display.replace_range(start, end, text);
        self.display.set_caret(self.display.end_offset());
    }

    /// Local screen clear; the command is not forwarded to the child.
    fn clear_screen(&mut self) {
        let end = self.display.end_offset();
        self.display.replace_range(0, end, "");
        self.boundary.reset();
        self.display.set_caret(0);
    }

    /// Forward an exit command, give the child a short drain window, then
    /// force-terminate whatever is left.
    fn graceful_exit(&mut self, command: &str) {
        let mut payload = command.as_bytes().to_vec();
        payload.extend_from_slice(LINE_SEPARATOR.as_bytes());
        if !self.send(&payload) {
            return;
        }
        for _ in 0..EXIT_GRACE_PASSES {
            self.poll_once();
            if self.exited {
                return;
            }
            if !self.channel.is_alive() {
                break;
            }
        }
        if !self.exited {
            self.channel.terminate();
            self.finish_exit();
        }
    }

    /// Best-effort write; a failed write is the exited transition, not an
    /// error the host sees.
    fn send(&mut self, bytes: &[u8]) -> bool {
        if self.exited {
            return false;
        }
        match self.channel.write(bytes) {
            Ok(()) => true,
            Err(err) => {
                warn!("channel write failed, session exiting: {}", err);
                self.finish_exit();
                false
            }
        }
    }

    /// Terminal state transition: marker line, read-only buffer.
    fn finish_exit(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        self.channel.terminate();
        info!("session exited");

        let end = self.display.end_offset();
        if end > 0 && !self.display.text_range(0, end).ends_with('\n') {
            self.display.append_text(LINE_SEPARATOR);
        }
        self.display.append_text(PROCESS_COMPLETE_MARKER);
        self.display.append_text(LINE_SEPARATOR);
        self.boundary.advance_to(self.display.end_offset());
        self.display.set_caret(self.boundary.offset());
    }

    /// Render one processed burst: append stripped text, apply color spans
    /// through the registry, tag stderr lines with the error style.
    fn render_burst(&mut self, burst: Burst) {
        let terminated = burst.terminated;
        let count = burst.lines.len();

        for (index, line) in burst.lines.into_iter().enumerate() {
            let last_output = index + 1 == count && line.kind == LineKind::Output;
            match line.kind {
                LineKind::Output => {
                    let stripped = AnsiStyler::strip(&line.text);
                    let base = self.display.end_offset();
                    self.display.append_text(&stripped.text);
                    for (start, end, key) in stripped.spans {
                        let id = self.styles.resolve(key, &mut self.display);
                        self.display.apply_style(id, base + start, base + end);
                    }
                    if !last_output || terminated {
                        self.display.append_text(LINE_SEPARATOR);
                    }
                }
                LineKind::Error => {
                    let base = self.display.end_offset();
                    self.display.append_text(&line.text);
                    let end = self.display.end_offset();
                    if end > base {
                        let id = self.styles.resolve(StyleKey::error(), &mut self.display);
                        self.display.apply_style(id, base, end);
                    }
                    self.display.append_text(LINE_SEPARATOR);
                }
            }
        }
    }
}

impl<D: DisplaySurface> Drop for Session<D> {
    fn drop(&mut self) {
        self.channel.terminate();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::*;
    use crate::core::channel::{ChannelMode, Result as ChannelResult};
    use crate::display::testing::RecordingSurface;

    /// Channel driven entirely by a script of reads. An empty chunk in the
    /// script ends the current burst; an exhausted script reads as
    /// quiescent forever.
    struct ScriptedChannel {
        reads: VecDeque<Vec<u8>>,
        errors: VecDeque<Vec<String>>,
        writes: Rc<RefCell<Vec<Vec<u8>>>>,
        alive: Rc<Cell<bool>>,
        terminated: Rc<Cell<bool>>,
        mode: ChannelMode,
    }

    struct ChannelProbe {
        writes: Rc<RefCell<Vec<Vec<u8>>>>,
        alive: Rc<Cell<bool>>,
        terminated: Rc<Cell<bool>>,
    }

    impl ScriptedChannel {
        fn new(mode: ChannelMode, reads: Vec<&[u8]>) -> (Self, ChannelProbe) {
            let writes = Rc::new(RefCell::new(Vec::new()));
            let alive = Rc::new(Cell::new(true));
            let terminated = Rc::new(Cell::new(false));
            let probe = ChannelProbe {
                writes: writes.clone(),
                alive: alive.clone(),
                terminated: terminated.clone(),
            };
            (
                Self {
                    reads: reads.into_iter().map(|chunk| chunk.to_vec()).collect(),
                    errors: VecDeque::new(),
                    writes,
                    alive,
                    terminated,
                    mode,
                },
                probe,
            )
        }
    }

    impl ProcessChannel for ScriptedChannel {
        fn read(&mut self, _timeout: Duration) -> ChannelResult<Vec<u8>> {
            Ok(self.reads.pop_front().unwrap_or_default())
        }

        fn write(&mut self, bytes: &[u8]) -> ChannelResult<()> {
            if !self.alive.get() {
                return Err(ChannelError::Closed);
            }
            self.writes.borrow_mut().push(bytes.to_vec());
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            self.alive.get()
        }

        fn terminate(&mut self) {
            self.alive.set(false);
            self.terminated.set(true);
        }

        fn interrupt_byte(&self) -> u8 {
            0x03
        }

        fn mode(&self) -> ChannelMode {
            self.mode
        }

        fn drain_errors(&mut self) -> Vec<String> {
            self.errors.pop_front().unwrap_or_default()
        }
    }

    fn session_with(
        mode: ChannelMode,
        reads: Vec<&[u8]>,
    ) -> (Session<RecordingSurface>, ChannelProbe) {
        let (channel, probe) = ScriptedChannel::new(mode, reads);
        let session =
            Session::with_channel(Box::new(channel), Config::default(), RecordingSurface::new());
        (session, probe)
    }

    fn press(session: &mut Session<RecordingSurface>, code: KeyCode) -> bool {
        session.handle_key(&KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(session: &mut Session<RecordingSurface>, text: &str) {
        for ch in text.chars() {
            press(session, KeyCode::Char(ch));
        }
    }

    #[test]
    fn burst_is_styled_and_boundary_advances() {
        let (mut session, _probe) =
            session_with(ChannelMode::Pty, vec![b"\x1b[31mHELLO\x1b[m\n"]);

        assert!(session.poll_once());
        assert_eq!(session.display().buffer, "HELLO\n");
        assert_eq!(session.display().applied, vec![(crate::display::StyleId(0), 0, 5)]);
        assert_eq!(session.boundary_offset(), 6);
        assert_eq!(session.display().caret, 6);
    }

    #[test]
    fn split_reads_form_one_burst() {
        let (mut session, _probe) =
            session_with(ChannelMode::Pty, vec![b"\x1b[3", b"1mok\x1b", b"[m\n"]);

        assert!(session.poll_once());
        assert_eq!(session.display().buffer, "ok\n");
        assert_eq!(session.display().applied.len(), 1);
    }

    #[test]
    fn quiescent_channel_does_no_work() {
        let (mut session, _probe) = session_with(ChannelMode::Pty, vec![]);
        assert!(!session.poll_once());
        assert!(session.display().buffer.is_empty());
    }

    #[test]
    fn child_death_appends_marker_and_locks_buffer() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![b"bye"]);

        assert!(session.poll_once());
        probe.alive.set(false);
        assert!(session.poll_once());

        assert!(session.is_exited());
        assert!(session.display().buffer.ends_with("[process complete]\n"));
        assert_eq!(session.boundary_offset(), session.display().end_offset());

        // Editing input is rejected outright now.
        let before = session.display().buffer.clone();
        assert!(press(&mut session, KeyCode::Char('x')));
        assert!(press(&mut session, KeyCode::Enter));
        assert_eq!(session.display().buffer, before);
        assert!(probe.writes.borrow().is_empty());
    }

    #[test]
    fn write_after_exit_sends_nothing() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![]);
        probe.alive.set(false);
        session.poll_once();
        assert!(session.is_exited());

        type_text(&mut session, "echo hi");
        press(&mut session, KeyCode::Enter);
        assert!(probe.writes.borrow().is_empty());
    }

    #[test]
    fn enter_writes_command_exactly_once() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![]);

        type_text(&mut session, "echo hi");
        assert_eq!(session.display().buffer, "echo hi");
        press(&mut session, KeyCode::Enter);

        let writes = probe.writes.borrow();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], b"echo hi\n");
    }

    #[test]
    fn typing_below_boundary_is_rejected() {
        let (mut session, _probe) = session_with(ChannelMode::Pty, vec![b"output\n"]);
        session.poll_once();
        assert_eq!(session.boundary_offset(), 7);

        session.display_mut().caret = 3;
        assert!(press(&mut session, KeyCode::Char('x')));
        assert_eq!(session.display().buffer, "output\n");

        session.display_mut().caret = 7;
        assert!(press(&mut session, KeyCode::Char('x')));
        assert_eq!(session.display().buffer, "output\nx");
    }

    #[test]
    fn history_recall_replaces_live_region_only() {
        let (mut session, _probe) = session_with(ChannelMode::Pty, vec![]);

        type_text(&mut session, "one");
        press(&mut session, KeyCode::Enter);
        type_text(&mut session, "two");
        press(&mut session, KeyCode::Enter);
        assert_eq!(session.display().buffer, "one\ntwo\n");

        press(&mut session, KeyCode::Up);
        assert_eq!(session.display().buffer, "one\ntwo\ntwo");
        press(&mut session, KeyCode::Up);
        assert_eq!(session.display().buffer, "one\ntwo\none");
        // Clamped at the oldest entry.
        press(&mut session, KeyCode::Up);
        assert_eq!(session.display().buffer, "one\ntwo\none");

        press(&mut session, KeyCode::Down);
        assert_eq!(session.display().buffer, "one\ntwo\ntwo");
        press(&mut session, KeyCode::Down);
        assert_eq!(session.display().buffer, "one\ntwo\n");
    }

    #[test]
    fn clear_command_wipes_screen_without_forwarding() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![b"noise\n"]);
        session.poll_once();

        type_text(&mut session, "clear");
        press(&mut session, KeyCode::Enter);

        assert_eq!(session.display().buffer, "");
        assert_eq!(session.boundary_offset(), 0);
        assert_eq!(session.display().caret, 0);
        assert!(probe.writes.borrow().is_empty());
    }

    #[test]
    fn exit_command_terminates_after_grace() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![]);

        type_text(&mut session, "exit");
        press(&mut session, KeyCode::Enter);

        assert_eq!(*probe.writes.borrow(), vec![b"exit\n".to_vec()]);
        assert!(probe.terminated.get());
        assert!(session.is_exited());
        assert!(session.display().buffer.ends_with("[process complete]\n"));
    }

    #[test]
    fn ctrl_c_sends_interrupt_byte() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![]);

        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(session.handle_key(&event));
        assert_eq!(*probe.writes.borrow(), vec![vec![0x03]]);
    }

    #[test]
    fn ctrl_c_with_selection_is_left_to_the_host() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![b"abc\n"]);
        session.poll_once();
        session.display_mut().selection = Some((0, 2));

        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(!session.handle_key(&event));
        assert!(probe.writes.borrow().is_empty());
    }

    #[test]
    fn pipe_mode_suppresses_echoed_command() {
        let (mut session, probe) =
            session_with(ChannelMode::Pipe, vec![b"ls -la\r\ntotal 4\nREADME.md\n"]);

        type_text(&mut session, "ls -la");
        press(&mut session, KeyCode::Enter);

        assert_eq!(*probe.writes.borrow(), vec![b"ls -la\n".to_vec()]);
        assert_eq!(session.display().buffer, "ls -la\ntotal 4\nREADME.md\n");
    }

    #[test]
    fn stderr_lines_are_prepended_and_styled() {
        let (mut channel, _probe) = ScriptedChannel::new(ChannelMode::Pipe, vec![b"out\n"]);
        channel.errors.push_back(vec!["oops".to_string()]);
        let mut session =
            Session::with_channel(Box::new(channel), Config::default(), RecordingSurface::new());

        session.poll_once();
        assert_eq!(session.display().buffer, "oops\nout\n");
        // The error style covers the stderr line.
        assert_eq!(session.display().applied, vec![(crate::display::StyleId(0), 0, 4)]);
    }

    #[test]
    fn home_jumps_to_boundary() {
        let (mut session, _probe) = session_with(ChannelMode::Pty, vec![b"prompt"]);
        session.poll_once();
        type_text(&mut session, "cmd");

        press(&mut session, KeyCode::Home);
        assert_eq!(session.display().caret, session.boundary_offset());
    }

    #[test]
    fn backspace_stops_at_boundary() {
        let (mut session, _probe) = session_with(ChannelMode::Pty, vec![b"$ "]);
        session.poll_once();
        type_text(&mut session, "ab");

        press(&mut session, KeyCode::Backspace);
        press(&mut session, KeyCode::Backspace);
        assert_eq!(session.display().buffer, "$ ");
        // At the boundary now; a further backspace must not touch output.
        press(&mut session, KeyCode::Backspace);
        assert_eq!(session.display().buffer, "$ ");
    }

    #[test]
    fn write_failure_becomes_exit_transition() {
        let (mut session, probe) = session_with(ChannelMode::Pty, vec![]);
        probe.alive.set(false);

        type_text(&mut session, "echo hi");
        press(&mut session, KeyCode::Enter);

        assert!(session.is_exited());
        assert!(session.display().buffer.ends_with("[process complete]\n"));
        assert!(probe.writes.borrow().is_empty());
    }
}
