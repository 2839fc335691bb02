//! The coordinator's event queue.
//!
//! Everything that touches the registry arrives here first: backend output,
//! bytes emitted by surfaces, completions of blocking or async work, and
//! requests from the front end.

use tabmux_vt::{Geometry, Viewport};
use tokio::sync::{mpsc, oneshot};

use crate::backend::{BackendEvent, BackendHandle, SessionId};
use crate::fallback::RunOutput;
use crate::multiplexer::MuxError;
use crate::pty::PtyError;
use crate::session::SessionStatus;

pub type Inbox = mpsc::UnboundedSender<Event>;
pub type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Event {
    Backend(BackendEvent),
    /// Bytes a surface emitted through its input subscription.
    Input { id: SessionId, data: Vec<u8> },
    SpawnFinished {
        id: SessionId,
        geometry: Geometry,
        result: Result<BackendHandle, PtyError>,
    },
    RunFinished {
        id: SessionId,
        command: String,
        output: RunOutput,
    },
    Request(Request),
}

/// Front-end operations, each answered on its own oneshot channel.
#[derive(Debug)]
pub enum Request {
    OpenTab {
        reply: Reply<SessionId>,
    },
    CloseTab {
        id: SessionId,
        reply: Reply<Result<(), MuxError>>,
    },
    Activate {
        id: SessionId,
        reply: Reply<Result<(), MuxError>>,
    },
    RunCommand {
        command: String,
        reply: Reply<Result<(), MuxError>>,
    },
    /// User typing, delivered to the active surface.
    Keystrokes { data: Vec<u8> },
    Viewport { viewport: Viewport },
    Snapshot {
        id: SessionId,
        reply: Reply<Option<SessionSnapshot>>,
    },
    Tabs { reply: Reply<Vec<TabInfo>> },
    Shutdown { reply: Reply<()> },
}

/// Point-in-time view of one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: SessionStatus,
    pub active: bool,
    /// Geometry the surface currently has.
    pub geometry: Geometry,
    /// Last geometry pushed to the backend.
    pub backend_geometry: Option<Geometry>,
    pub pid: Option<u32>,
    pub title: Option<String>,
    pub lines: Vec<String>,
    /// A fallback command is running and its output has not been written yet.
    pub command_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: SessionId,
    pub status: SessionStatus,
    pub active: bool,
}
