use std::fmt;

use tabmux_vt::{Geometry, InputSubscription, RenderSurface};

use crate::backend::{BackendHandle, PtyBackend, SessionId};
use crate::router::normalize_newlines;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Surface exists, spawn not yet confirmed.
    Pending,
    /// Backend process bound, input flowing.
    Live,
    /// No backend process: spawn failed, the shell exited, or the
    /// multiplexer runs without a native backend. Commands use fallback mode.
    Detached,
    /// Teardown in progress.
    Closing,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Live => "live",
            SessionStatus::Detached => "detached",
            SessionStatus::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// One tab's binding between a rendering surface and a backend process.
pub struct Session<S> {
    id: SessionId,
    surface: S,
    backend: Option<BackendHandle>,
    input: Option<InputSubscription>,
    geometry: Option<Geometry>,
    status: SessionStatus,
    /// Output chunk ended in `\r`; a leading `\n` in the next chunk is already paired.
    pending_cr: bool,
    command_in_flight: bool,
    /// Newest backend generation reported as exited.
    exited_generation: Option<u64>,
}

impl<S> Session<S> {
    pub fn new(id: SessionId, surface: S, input: InputSubscription) -> Self {
        Self {
            id,
            surface,
            backend: None,
            input: Some(input),
            geometry: None,
            status: SessionStatus::Pending,
            pending_cr: false,
            command_in_flight: false,
            exited_generation: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live && self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&BackendHandle> {
        self.backend.as_ref()
    }

    /// Last geometry successfully pushed to the backend.
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub(crate) fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub(crate) fn command_in_flight(&self) -> bool {
        self.command_in_flight
    }

    pub(crate) fn set_command_in_flight(&mut self, in_flight: bool) {
        self.command_in_flight = in_flight;
    }

    /// Whether the process of `generation` has already been reported as exited.
    ///
    /// An exit can be routed before the spawn that started the process is.
    pub(crate) fn has_exited(&self, generation: u64) -> bool {
        self.exited_generation.is_some_and(|exited| exited >= generation)
    }
}

impl<S: RenderSurface> Session<S> {
    /// Append process output to the surface with line endings normalized.
    pub fn write_output(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let normalized = normalize_newlines(data, &mut self.pending_cr);
        self.surface.write(&normalized);
    }

    /// Bind a freshly spawned backend process.
    ///
    /// Returns the handle it replaced, which the caller must have closed.
    pub fn bind_backend(&mut self, handle: BackendHandle) -> Option<BackendHandle> {
        self.status = SessionStatus::Live;
        self.backend.replace(handle)
    }

    /// Record that the process of `generation` exited and drop the binding.
    pub fn backend_exited(&mut self, generation: u64) -> Option<BackendHandle> {
        let newest = self.exited_generation.map_or(generation, |g| g.max(generation));
        self.exited_generation = Some(newest);
        self.detach_backend()
    }

    /// Forget the backend binding; later commands run in fallback mode.
    pub fn detach_backend(&mut self) -> Option<BackendHandle> {
        self.status = SessionStatus::Detached;
        self.backend.take()
    }

    /// Release everything the session owns.
    ///
    /// Each step runs even if an earlier one fails: the input subscription is
    /// released, the backend is asked to close the id (whether or not a
    /// process was ever bound), and the surface is disposed.
    pub fn teardown(mut self, backend: Option<&dyn PtyBackend>) {
        self.status = SessionStatus::Closing;

        if let Some(input) = self.input.take() {
            input.release();
        }

        if let Some(backend) = backend {
            if let Err(e) = backend.close(self.id) {
                log::warn!("failed to close backend for tab {}: {e}", self.id);
            }
        }
        self.backend = None;

        self.surface.dispose();
        log::debug!("tab {} torn down", self.id);
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("backend", &self.backend)
            .field("geometry", &self.geometry)
            .field("command_in_flight", &self.command_in_flight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockSurface};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session(id: SessionId) -> (Session<MockSurface>, Arc<AtomicUsize>) {
        let (surface, _probe) = MockSurface::new();
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let input = InputSubscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (Session::new(id, surface, input), releases)
    }

    fn handle(id: SessionId, generation: u64) -> BackendHandle {
        BackendHandle {
            session_id: id,
            generation,
            pid: None,
        }
    }

    #[test]
    fn test_new_session_is_pending() {
        let (session, _) = session(1);
        assert_eq!(session.status(), SessionStatus::Pending);
        assert!(!session.is_live());
        assert!(session.geometry().is_none());
    }

    #[test]
    fn test_bind_and_detach() {
        let (mut session, _) = session(1);
        assert!(session.bind_backend(handle(1, 1)).is_none());
        assert!(session.is_live());

        assert_eq!(session.detach_backend(), Some(handle(1, 1)));
        assert_eq!(session.status(), SessionStatus::Detached);
        assert!(!session.is_live());
    }

    #[test]
    fn test_teardown_releases_and_closes_once() {
        let backend = MockBackend::new();
        let (mut session, releases) = session(4);
        session.bind_backend(handle(4, 1));

        session.teardown(Some(&backend));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.close_count(4), 1);
    }

    #[test]
    fn test_teardown_survives_close_failure() {
        let backend = MockBackend::new();
        backend.fail_close(true);
        let (surface, probe) = MockSurface::new();
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let session = Session::new(
            2,
            surface,
            InputSubscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        session.teardown(Some(&backend));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.close_count(2), 1);
        assert!(probe.disposed());
    }

    #[test]
    fn test_write_output_normalizes_across_chunks() {
        let (surface, probe) = MockSurface::new();
        let mut session = Session::new(1, surface, InputSubscription::new(|| {}));
        session.write_output(b"a\r");
        session.write_output(b"\nb\n");
        assert_eq!(probe.output(), b"a\r\nb\r\n");
    }

    #[test]
    fn test_exit_recorded_before_bind() {
        let (mut session, _) = session(1);
        session.backend_exited(3);
        assert_eq!(session.status(), SessionStatus::Detached);
        assert!(session.has_exited(3));
        assert!(session.has_exited(2));
        assert!(!session.has_exited(4));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Live.to_string(), "live");
        assert_eq!(SessionStatus::Detached.to_string(), "detached");
    }
}
