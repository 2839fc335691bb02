use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use tabmux_vt::{Geometry, RenderSurface, Viewport};
use tokio::sync::mpsc;

use crate::backend::{BackendHandle, PtyBackend, SessionId};
use crate::event::{Event, Inbox, Request, SessionSnapshot, TabInfo};
use crate::fallback::CommandRunner;
use crate::pty::PtyError;
use crate::registry::Registry;
use crate::session::Session;

pub(crate) const RED: &str = "\x1b[31m";
pub(crate) const RESET: &str = "\x1b[0m";

/// Errors returned to the front end by multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("tab {0} is the last open tab")]
    LastTab(SessionId),
    #[error("no open tab with id {0}")]
    UnknownTab(SessionId),
    #[error("command is empty")]
    EmptyCommand,
    #[error("a command is already running in tab {0}")]
    CommandInFlight(SessionId),
    #[error("no active tab")]
    NoActiveTab,
    #[error("failed to send command to tab {id}")]
    WriteFailed {
        id: SessionId,
        #[source]
        source: PtyError,
    },
    #[error("multiplexer has stopped")]
    Stopped,
}

/// Builds the rendering surface for a newly opened tab.
pub type SurfaceFactory<S> = Box<dyn FnMut(SessionId) -> S + Send>;

/// Owns every session and drives their lifecycle.
///
/// The multiplexer is not shared: one task owns it and feeds it [`Event`]s
/// one at a time (see [`Coordinator`](crate::coordinator::Coordinator)).
/// Work that blocks or waits, such as spawning a shell or running a fallback
/// command, runs elsewhere and reports back through the inbox.
pub struct Multiplexer<S> {
    pub(crate) registry: Registry<S>,
    /// Open tabs in display order.
    pub(crate) tabs: Vec<SessionId>,
    pub(crate) active: Option<SessionId>,
    pub(crate) viewport: Viewport,
    pub(crate) backend: Option<Arc<dyn PtyBackend>>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) inbox: Inbox,
    /// Tabs whose spawn has not reported back yet.
    spawning: HashSet<SessionId>,
    new_surface: SurfaceFactory<S>,
    next_id: SessionId,
}

impl<S: RenderSurface> Multiplexer<S> {
    /// Create a multiplexer and the receiving end of its event queue.
    ///
    /// Without a `backend` every tab is detached and commands run through
    /// `runner`.
    pub fn new(
        viewport: Viewport,
        backend: Option<Arc<dyn PtyBackend>>,
        runner: Arc<dyn CommandRunner>,
        new_surface: SurfaceFactory<S>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (inbox, events) = mpsc::unbounded_channel();
        let mux = Self {
            registry: Registry::new(),
            tabs: Vec::new(),
            active: None,
            viewport,
            backend,
            runner,
            inbox,
            spawning: HashSet::new(),
            new_surface,
            next_id: 1,
        };
        (mux, events)
    }

    pub fn active(&self) -> Option<SessionId> {
        self.active
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Open a new tab, make it active and start its shell.
    ///
    /// The spawn runs on the blocking pool; its result arrives later as
    /// [`Event::SpawnFinished`].
    pub fn open_tab(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;

        let mut surface = (self.new_surface)(id);
        surface.open(self.viewport);
        let geometry = surface.fit_to_container(self.viewport);

        let inbox = self.inbox.clone();
        let input = surface.on_input_bytes(Box::new(move |bytes: &[u8]| {
            let _ = inbox.send(Event::Input {
                id,
                data: bytes.to_vec(),
            });
        }));

        if let Some(stale) = self.registry.register(Session::new(id, surface, input)) {
            log::warn!("tab {id} was already registered; tearing down the stale session");
            stale.teardown(self.backend.as_deref());
        }
        self.tabs.push(id);
        self.show(id);

        match &self.backend {
            Some(backend) => {
                let backend = Arc::clone(backend);
                let inbox = self.inbox.clone();
                self.spawning.insert(id);
                tokio::task::spawn_blocking(move || {
                    let result = backend.spawn(id, geometry);
                    let _ = inbox.send(Event::SpawnFinished {
                        id,
                        geometry,
                        result,
                    });
                });
            }
            None => {
                if let Some(session) = self.registry.lookup_mut(id) {
                    session.detach_backend();
                }
            }
        }

        log::debug!("opened tab {id} at {geometry}");
        id
    }

    pub(crate) fn finish_spawn(
        &mut self,
        id: SessionId,
        geometry: Geometry,
        result: Result<BackendHandle, PtyError>,
    ) {
        self.spawning.remove(&id);

        let Some(session) = self.registry.lookup_mut(id) else {
            // The tab closed while the spawn was outstanding; its close was
            // deferred to here so it happens exactly once.
            log::debug!("tab {id} closed before its shell started");
            if let Some(backend) = &self.backend {
                if let Err(e) = backend.close(id) {
                    log::warn!("failed to close backend for tab {id}: {e}");
                }
            }
            return;
        };

        match result {
            Ok(handle) if session.has_exited(handle.generation) => {
                // The shell died before its spawn was routed; the exit
                // notice is already on screen.
                log::debug!(
                    "shell for tab {id} exited before it was bound (generation {})",
                    handle.generation
                );
            }
            Ok(handle) => {
                if let Some(previous) = session.bind_backend(handle) {
                    log::warn!(
                        "tab {id} rebound from backend generation {}",
                        previous.generation
                    );
                }
                self.after_spawn(id, geometry);
            }
            Err(e) => {
                log::warn!("failed to start shell for tab {id}: {e}");
                session.detach_backend();
                session.write_output(spawn_failure_notice(&e).as_bytes());
            }
        }
    }

    /// Close a tab and release everything it owns.
    ///
    /// Closing an unknown or already closed id is a no-op. The last open tab
    /// cannot be closed.
    pub fn close_tab(&mut self, id: SessionId) -> Result<(), MuxError> {
        let Some(index) = self.tabs.iter().position(|tab| *tab == id) else {
            log::debug!("close requested for unknown tab {id}");
            return Ok(());
        };
        if self.tabs.len() == 1 {
            return Err(MuxError::LastTab(id));
        }

        self.tabs.remove(index);
        let was_active = self.active == Some(id);
        if was_active {
            self.active = None;
        }
        self.teardown(id);

        if was_active {
            let next = self.tabs[index.saturating_sub(1)];
            self.show(next);
        }
        log::debug!("closed tab {id}");
        Ok(())
    }

    /// Make `id` the visible tab.
    pub fn activate(&mut self, id: SessionId) -> Result<(), MuxError> {
        if !self.tabs.contains(&id) {
            return Err(MuxError::UnknownTab(id));
        }
        if self.active != Some(id) {
            self.show(id);
        }
        Ok(())
    }

    /// Tear down every tab, ignoring the last-tab rule.
    pub fn shutdown(&mut self) {
        self.active = None;
        // No spawn result is processed after this, so close outstanding ones now.
        self.spawning.clear();
        for id in std::mem::take(&mut self.tabs) {
            self.teardown(id);
        }
        log::info!("multiplexer shut down");
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        self.tabs
            .iter()
            .filter_map(|id| self.registry.lookup(*id))
            .map(|session| TabInfo {
                id: session.id(),
                status: session.status(),
                active: self.active == Some(session.id()),
            })
            .collect()
    }

    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        let session = self.registry.lookup(id)?;
        Some(SessionSnapshot {
            id,
            status: session.status(),
            active: self.active == Some(id),
            geometry: session.surface().current_geometry(),
            backend_geometry: session.geometry(),
            pid: session.backend().and_then(|handle| handle.pid),
            title: session.surface().title(),
            lines: session.surface().screen_lines(),
            command_in_flight: session.command_in_flight(),
        })
    }

    /// Apply one event. Returns `Break` once the multiplexer has shut down.
    pub fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Backend(event) => self.route_output(event),
            Event::Input { id, data } => self.route_input(id, &data),
            Event::SpawnFinished {
                id,
                geometry,
                result,
            } => self.finish_spawn(id, geometry, result),
            Event::RunFinished {
                id,
                command,
                output,
            } => self.finish_run(id, &command, &output),
            Event::Request(request) => return self.handle_request(request),
        }
        ControlFlow::Continue(())
    }

    fn handle_request(&mut self, request: Request) -> ControlFlow<()> {
        // A dropped reply channel only means the caller stopped waiting.
        match request {
            Request::OpenTab { reply } => {
                let _ = reply.send(self.open_tab());
            }
            Request::CloseTab { id, reply } => {
                let _ = reply.send(self.close_tab(id));
            }
            Request::Activate { id, reply } => {
                let _ = reply.send(self.activate(id));
            }
            Request::RunCommand { command, reply } => {
                let _ = reply.send(self.run_command(&command));
            }
            Request::Keystrokes { data } => self.keystrokes(&data),
            Request::Viewport { viewport } => self.viewport_changed(viewport),
            Request::Snapshot { id, reply } => {
                let _ = reply.send(self.snapshot(id));
            }
            Request::Tabs { reply } => {
                let _ = reply.send(self.tabs());
            }
            Request::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Blur the previous tab, focus `id` and bring its geometry up to date.
    fn show(&mut self, id: SessionId) {
        if let Some(previous) = self.active.filter(|previous| *previous != id) {
            if let Some(session) = self.registry.lookup_mut(previous) {
                session.surface_mut().blur();
            }
        }
        self.active = Some(id);
        if let Some(session) = self.registry.lookup_mut(id) {
            session.surface_mut().focus();
        }
        self.sync_geometry(id);
    }

    fn teardown(&mut self, id: SessionId) {
        let Some(session) = self.registry.unregister(id) else {
            return;
        };
        // With a spawn outstanding, the close happens when it reports back.
        let backend = if self.spawning.contains(&id) {
            None
        } else {
            self.backend.as_deref()
        };
        session.teardown(backend);
    }
}

fn spawn_failure_notice(error: &PtyError) -> String {
    format!(
        "{RED}Failed to start shell: {error}{RESET}\r\n\
         Commands in this tab run one at a time without a terminal.\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendEvent;
    use crate::session::SessionStatus;
    use crate::testing::{Call, Harness};

    #[tokio::test]
    async fn test_open_tab_spawns_at_surface_geometry() {
        let mut h = Harness::new();
        let id = h.mux.open_tab();
        h.settle().await;

        assert_eq!(h.mux.active(), Some(id));
        assert!(h.backend.calls().contains(&Call::Spawn(id, Geometry::new(80, 24))));
        assert_eq!(h.status(id), Some(SessionStatus::Live));
        assert!(h.probe(id).focused());
    }

    #[tokio::test]
    async fn test_session_count_tracks_open_tabs() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        let c = h.mux.open_tab();
        h.settle().await;
        assert_eq!(h.mux.session_count(), 3);

        h.mux.close_tab(b).unwrap();
        assert_eq!(h.mux.session_count(), 2);
        let d = h.mux.open_tab();
        h.mux.close_tab(a).unwrap();
        h.mux.close_tab(c).unwrap();
        h.settle().await;

        assert_eq!(h.mux.session_count(), 1);
        assert_eq!(h.mux.registry().ids(), vec![d]);
        assert_eq!(h.mux.tabs().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        h.mux.close_tab(b).unwrap();
        let c = h.mux.open_tab();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_close_after_failed_spawn_closes_and_releases_once() {
        let mut h = Harness::new();
        let keep = h.mux.open_tab();
        h.backend.fail_spawn(true);
        let failed = h.mux.open_tab();
        h.settle().await;
        assert_eq!(h.status(failed), Some(SessionStatus::Detached));

        h.mux.close_tab(failed).unwrap();
        h.settle().await;

        assert_eq!(h.backend.close_count(failed), 1);
        assert_eq!(h.probe(failed).releases(), 1);
        assert!(h.probe(failed).disposed());
        assert_eq!(h.mux.active(), Some(keep));
    }

    #[tokio::test]
    async fn test_close_during_spawn_closes_once() {
        let mut h = Harness::new();
        h.mux.open_tab();
        let racing = h.mux.open_tab();
        // Close before the spawn result is processed.
        h.mux.close_tab(racing).unwrap();
        h.settle().await;

        assert_eq!(h.backend.close_count(racing), 1);
        assert_eq!(h.probe(racing).releases(), 1);
        assert!(!h.mux.registry().contains(racing));
    }

    #[tokio::test]
    async fn test_close_twice_is_ok() {
        let mut h = Harness::new();
        h.mux.open_tab();
        let b = h.mux.open_tab();
        h.settle().await;

        assert!(h.mux.close_tab(b).is_ok());
        assert!(h.mux.close_tab(b).is_ok());
        assert_eq!(h.backend.close_count(b), 1);
    }

    #[tokio::test]
    async fn test_last_tab_cannot_be_closed() {
        let mut h = Harness::new();
        let only = h.mux.open_tab();
        h.settle().await;

        assert!(matches!(h.mux.close_tab(only), Err(MuxError::LastTab(id)) if id == only));
        assert!(h.mux.registry().contains(only));
        assert_eq!(h.backend.close_count(only), 0);
        assert_eq!(h.probe(only).releases(), 0);
    }

    #[tokio::test]
    async fn test_closing_active_tab_activates_left_neighbor() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        let c = h.mux.open_tab();
        h.settle().await;

        h.mux.activate(b).unwrap();
        h.mux.close_tab(b).unwrap();
        assert_eq!(h.mux.active(), Some(a));
        assert!(h.probe(a).focused());

        h.mux.activate(a).unwrap();
        h.mux.close_tab(a).unwrap();
        assert_eq!(h.mux.active(), Some(c));
    }

    #[tokio::test]
    async fn test_activate_unknown_tab_fails() {
        let mut h = Harness::new();
        h.mux.open_tab();
        assert!(matches!(h.mux.activate(42), Err(MuxError::UnknownTab(42))));
    }

    #[tokio::test]
    async fn test_activate_moves_focus() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        h.settle().await;
        assert!(!h.probe(a).focused());
        assert!(h.probe(b).focused());

        h.mux.activate(a).unwrap();
        assert!(h.probe(a).focused());
        assert!(!h.probe(b).focused());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_inline() {
        let mut h = Harness::new();
        h.backend.fail_spawn(true);
        let id = h.mux.open_tab();
        h.settle().await;

        let text = h.probe(id).output_text();
        assert!(text.contains("Failed to start shell"), "got: {text}");
        assert!(h.mux.registry().contains(id));
    }

    #[tokio::test]
    async fn test_without_backend_tabs_are_detached() {
        let mut h = Harness::without_backend();
        let id = h.mux.open_tab();
        h.settle().await;
        assert_eq!(h.status(id), Some(SessionStatus::Detached));
    }

    #[tokio::test]
    async fn test_shutdown_tears_everything_down() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        h.settle().await;

        let (reply, done) = tokio::sync::oneshot::channel();
        let flow = h.mux.handle_event(Event::Request(Request::Shutdown { reply }));
        assert!(flow.is_break());
        assert!(done.await.is_ok());

        assert_eq!(h.mux.session_count(), 0);
        assert_eq!(h.backend.close_count(a), 1);
        assert_eq!(h.backend.close_count(b), 1);
    }

    #[tokio::test]
    async fn test_exit_routed_before_spawn_keeps_tab_detached() {
        let mut h = Harness::new();
        let id = h.mux.open_tab();

        // The shell dies before its spawn result reaches the multiplexer.
        let _ = h.mux.handle_event(Event::Backend(BackendEvent::Exited {
            id,
            generation: 1,
            code: Some(127),
        }));
        let _ = h.mux.handle_event(Event::SpawnFinished {
            id,
            geometry: Geometry::new(80, 24),
            result: Ok(BackendHandle {
                session_id: id,
                generation: 1,
                pid: Some(1001),
            }),
        });
        h.settle().await;

        assert_eq!(h.status(id), Some(SessionStatus::Detached));
        assert!(h.probe(id).output_text().contains("[process exited with code 127]"));

        h.mux.run_command("echo after").unwrap();
        h.settle().await;
        assert_eq!(h.runner.commands(), vec!["echo after".to_string()]);
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_exit_of_superseded_process_is_ignored() {
        let mut h = Harness::new();
        let id = h.mux.open_tab();
        h.settle().await;
        let bound = h.mux.registry().lookup(id).and_then(|s| s.backend().cloned()).unwrap();

        let _ = h.mux.handle_event(Event::Backend(BackendEvent::Exited {
            id,
            generation: bound.generation - 1,
            code: Some(0),
        }));

        assert_eq!(h.status(id), Some(SessionStatus::Live));
        assert!(!h.probe(id).output_text().contains("process exited"));
    }

    #[tokio::test]
    async fn test_snapshot_and_tabs() {
        let mut h = Harness::new();
        let a = h.mux.open_tab();
        let b = h.mux.open_tab();
        h.settle().await;
        let _ = h.mux.handle_event(Event::Backend(BackendEvent::Output {
            id: a,
            data: b"hi".to_vec(),
        }));

        let snapshot = h.mux.snapshot(a).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Live);
        assert!(!snapshot.active);
        assert_eq!(snapshot.geometry, Geometry::new(80, 24));
        assert!(h.mux.snapshot(99).is_none());

        let tabs = h.mux.tabs();
        assert_eq!(tabs.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a, b]);
        assert!(tabs[1].active);
    }
}
