use std::fmt;
use std::sync::{Arc, Mutex};

use crate::terminal::{VtTerminal, DEFAULT_SCROLLBACK};

/// Terminal size in character cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Pixel size of the container a surface is laid out in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}px", self.width, self.height)
    }
}

/// Pixel size of one character cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellMetrics {
    pub width: u32,
    pub height: u32,
}

impl CellMetrics {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of whole cells that fit in `viewport`, never below 2x1.
    pub fn fit(&self, viewport: Viewport) -> Geometry {
        let cols = viewport.width / self.width.max(1);
        let rows = viewport.height / self.height.max(1);
        Geometry {
            cols: cols.clamp(2, u16::MAX as u32) as u16,
            rows: rows.clamp(1, u16::MAX as u32) as u16,
        }
    }
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self::new(9, 18)
    }
}

/// Receives the bytes a surface emits: keystrokes and terminal replies.
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Cancellable registration of an [`InputCallback`].
///
/// The cancel action runs exactly once: on [`InputSubscription::release`], or
/// on drop if the subscription was never released.
pub struct InputSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl InputSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop delivering input to the callback.
    pub fn release(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for InputSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for InputSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The widget a session renders into.
///
/// Surfaces interpret escape sequences and paint glyphs; the multiplexer only
/// writes output bytes into them, asks them to re-fit after layout changes,
/// and subscribes to the bytes they emit.
pub trait RenderSurface: Send + 'static {
    /// Attach the surface to a container of the given size.
    fn open(&mut self, viewport: Viewport);

    /// Append process output.
    fn write(&mut self, bytes: &[u8]);

    /// Register the receiver for emitted bytes, replacing any previous one.
    fn on_input_bytes(&mut self, callback: InputCallback) -> InputSubscription;

    /// Recompute the cell geometry for a container of the given size.
    fn fit_to_container(&mut self, viewport: Viewport) -> Geometry;

    fn current_geometry(&self) -> Geometry;

    fn focus(&mut self);

    fn blur(&mut self) {}

    /// Keystrokes typed by the user. Only a focused surface forwards them.
    fn key_input(&mut self, bytes: &[u8]);

    /// Release the surface. Later writes are ignored.
    fn dispose(&mut self);

    fn title(&self) -> Option<String> {
        None
    }

    /// Visible text, top row first.
    fn screen_lines(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Headless [`RenderSurface`] backed by a [`VtTerminal`].
pub struct VtSurface {
    metrics: CellMetrics,
    scrollback: usize,
    terminal: Option<VtTerminal>,
    geometry: Geometry,
    focused: bool,
    input: Arc<Mutex<Option<InputCallback>>>,
}

impl VtSurface {
    pub fn new(metrics: CellMetrics, scrollback: usize) -> Self {
        Self {
            metrics,
            scrollback,
            terminal: None,
            geometry: Geometry::default(),
            focused: false,
            input: Arc::new(Mutex::new(None)),
        }
    }

    fn emit(&self, bytes: &[u8]) {
        if let Ok(mut input) = self.input.lock() {
            if let Some(callback) = input.as_mut() {
                callback(bytes);
            }
        }
    }
}

impl Default for VtSurface {
    fn default() -> Self {
        Self::new(CellMetrics::default(), DEFAULT_SCROLLBACK)
    }
}

impl RenderSurface for VtSurface {
    fn open(&mut self, viewport: Viewport) {
        self.geometry = self.metrics.fit(viewport);
        match self.terminal.as_mut() {
            Some(terminal) => terminal.resize(self.geometry.cols, self.geometry.rows),
            None => {
                self.terminal = Some(VtTerminal::new(
                    self.geometry.cols,
                    self.geometry.rows,
                    self.scrollback,
                ));
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some(terminal) = self.terminal.as_mut() else {
            log::trace!("dropping {} bytes written to a closed surface", bytes.len());
            return;
        };
        terminal.write(bytes);

        // Replies to terminal queries travel the same way keystrokes do.
        for reply in terminal.take_pty_writes() {
            self.emit(reply.as_bytes());
        }
    }

    fn on_input_bytes(&mut self, callback: InputCallback) -> InputSubscription {
        if let Ok(mut input) = self.input.lock() {
            *input = Some(callback);
        }
        let input = Arc::clone(&self.input);
        InputSubscription::new(move || {
            if let Ok(mut input) = input.lock() {
                input.take();
            }
        })
    }

    fn fit_to_container(&mut self, viewport: Viewport) -> Geometry {
        let geometry = self.metrics.fit(viewport);
        if geometry != self.geometry {
            if let Some(terminal) = self.terminal.as_mut() {
                terminal.resize(geometry.cols, geometry.rows);
            }
            self.geometry = geometry;
        }
        self.geometry
    }

    fn current_geometry(&self) -> Geometry {
        self.geometry
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn blur(&mut self) {
        self.focused = false;
    }

    fn key_input(&mut self, bytes: &[u8]) {
        if self.focused {
            self.emit(bytes);
        }
    }

    fn dispose(&mut self) {
        self.terminal = None;
        self.focused = false;
        if let Ok(mut input) = self.input.lock() {
            input.take();
        }
    }

    fn title(&self) -> Option<String> {
        self.terminal.as_ref().and_then(VtTerminal::title)
    }

    fn screen_lines(&self) -> Vec<String> {
        self.terminal
            .as_ref()
            .map(|terminal| terminal.screen().lines())
            .unwrap_or_default()
    }
}
