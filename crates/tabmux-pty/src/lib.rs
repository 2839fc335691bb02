//! tabmux-pty: terminal session multiplexing.
//!
//! Manages any number of shell sessions ("tabs"), each backed by a PTY
//! process, and keeps every session's surface, input, output and size
//! consistent while tabs are opened, switched, resized and closed.
//!
//! # Architecture
//!
//! - [`PtyBackend`]: the process layer. [`NativeBackend`] runs shells in
//!   real PTYs; [`CommandRunner`] runs one-shot commands when no PTY is
//!   available.
//! - [`Session`] and [`Registry`]: per-tab state and its ownership table.
//! - [`Multiplexer`]: tab lifecycle, output and input routing, resize
//!   propagation and command dispatch.
//! - [`Coordinator`]: owns the multiplexer on one task and serializes every
//!   event into it; [`MuxHandle`] is the front end's view of it.

pub mod backend;
pub mod coordinator;
mod dispatch;
pub mod event;
pub mod fallback;
pub mod multiplexer;
pub mod native;
pub mod pty;
pub mod registry;
mod resize;
mod router;
pub mod session;

#[cfg(test)]
mod testing;

pub use backend::{BackendEvent, BackendEvents, BackendHandle, PtyBackend, SessionId};
pub use coordinator::{Coordinator, MuxHandle};
pub use event::{Event, SessionSnapshot, TabInfo};
pub use fallback::{CommandRunner, RunOutput, ShellRunner};
pub use multiplexer::{Multiplexer, MuxError, SurfaceFactory};
pub use native::NativeBackend;
pub use pty::{PtyError, PtyHandle, ShellSpec};
pub use registry::Registry;
pub use session::{Session, SessionStatus};
