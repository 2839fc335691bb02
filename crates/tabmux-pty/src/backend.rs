use tabmux_vt::Geometry;
use tokio::sync::mpsc;

use crate::pty::PtyError;

/// Unique identifier for a terminal tab and its session.
///
/// Allocated from a monotonically increasing counter and never reused.
pub type SessionId = u64;

/// Proof that a backend process is bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    pub session_id: SessionId,
    /// Distinguishes successive processes spawned for the same id.
    pub generation: u64,
    pub pid: Option<u32>,
}

/// Events pushed by a backend, tagged with the session they belong to.
///
/// Events for one session arrive in the order the process produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Output { id: SessionId, data: Vec<u8> },
    /// The process behind `id` exited on its own.
    Exited {
        id: SessionId,
        /// Generation of the process that exited, as in [`BackendHandle`].
        generation: u64,
        code: Option<u32>,
    },
}

impl BackendEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            BackendEvent::Output { id, .. } | BackendEvent::Exited { id, .. } => *id,
        }
    }
}

pub type BackendEvents = mpsc::UnboundedReceiver<BackendEvent>;

/// Process layer that hosts one pseudo-terminal per session.
///
/// `spawn` blocks until the process is running and should be called off the
/// event loop. `write`, `resize` and `close` return promptly.
pub trait PtyBackend: Send + Sync {
    /// Start a PTY of the given size for `id`.
    ///
    /// If `id` already has a live process it is closed first; only the
    /// returned handle is canonical afterwards.
    fn spawn(&self, id: SessionId, geometry: Geometry) -> Result<BackendHandle, PtyError>;

    /// Queue input for the process. Fails with [`PtyError::NotFound`] when
    /// `id` has no process.
    fn write(&self, id: SessionId, data: &[u8]) -> Result<(), PtyError>;

    fn resize(&self, id: SessionId, geometry: Geometry) -> Result<(), PtyError>;

    /// Tear down the process for `id`. Closing an unknown id is a no-op.
    fn close(&self, id: SessionId) -> Result<(), PtyError>;
}
