use std::sync::{Arc, Mutex};

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi;

use crate::screen::ScreenView;

/// Scrollback kept by a surface unless configured otherwise.
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Events the terminal raised while parsing output.
#[derive(Default)]
struct EventState {
    title: Option<String>,
    pty_writes: Vec<String>,
}

/// Captures terminal events behind a shared lock.
///
/// `Term` requires its listener to be `Clone`, so the state lives in an
/// `Arc<Mutex<_>>` shared between the clones.
#[derive(Clone)]
pub struct EventProxy {
    state: Arc<Mutex<EventState>>,
}

impl EventProxy {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState::default())),
        }
    }
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event {
            Event::Title(title) => state.title = Some(title),
            Event::ResetTitle => state.title = None,
            Event::PtyWrite(data) => state.pty_writes.push(data),
            _ => {}
        }
    }
}

struct TermSize {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

/// Terminal state machine behind a [`crate::VtSurface`].
///
/// Parses output bytes into a grid, tracks the OSC title, and collects the
/// replies the terminal owes the process (device status reports and the like).
pub struct VtTerminal {
    term: Term<EventProxy>,
    parser: ansi::Processor,
    event_proxy: EventProxy,
}

impl VtTerminal {
    /// Create a terminal with the given dimensions and scrollback depth.
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        let config = Config {
            scrolling_history: scrollback,
            ..Config::default()
        };

        let size = TermSize {
            columns: cols as usize,
            screen_lines: rows as usize,
        };

        let event_proxy = EventProxy::new();
        let term = Term::new(config, &size, event_proxy.clone());

        Self {
            term,
            parser: ansi::Processor::new(),
            event_proxy,
        }
    }

    /// Feed process output through the VT parser.
    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.term, bytes);
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let size = TermSize {
            columns: cols as usize,
            screen_lines: rows as usize,
        };
        self.term.resize(size);
    }

    pub fn screen(&self) -> ScreenView<'_> {
        ScreenView::new(&self.term)
    }

    /// Title set through OSC 0/2, if any.
    pub fn title(&self) -> Option<String> {
        self.event_proxy
            .state
            .lock()
            .ok()
            .and_then(|state| state.title.clone())
    }

    /// Drain the replies the terminal wants written back to the process.
    pub fn take_pty_writes(&mut self) -> Vec<String> {
        match self.event_proxy.state.lock() {
            Ok(mut state) => std::mem::take(&mut state.pty_writes),
            Err(_) => Vec::new(),
        }
    }
}
