//! tabmux-vt: rendering surfaces for tabmux sessions.
//!
//! A rendering surface is the widget a terminal tab paints into. The
//! multiplexer only feeds it bytes, reads its viewport geometry, and listens
//! to the bytes it emits (keystrokes and terminal replies).
//!
//! - [`RenderSurface`]: the contract the multiplexer drives.
//! - [`VtSurface`]: a headless surface backed by [`VtTerminal`], which wraps
//!   `alacritty_terminal` for escape-sequence handling.

pub mod screen;
pub mod surface;
pub mod terminal;

pub use screen::ScreenView;
pub use surface::{
    CellMetrics, Geometry, InputCallback, InputSubscription, RenderSurface, Viewport, VtSurface,
};
pub use terminal::VtTerminal;
