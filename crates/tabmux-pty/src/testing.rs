//! Recording doubles for the backend, the surface and the fallback runner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tabmux_vt::{CellMetrics, Geometry, InputCallback, InputSubscription, RenderSurface, Viewport};
use tokio::sync::mpsc;

use crate::backend::{BackendEvent, BackendEvents, BackendHandle, PtyBackend, SessionId};
use crate::event::Event;
use crate::fallback::{CommandRunner, RunOutput};
use crate::multiplexer::Multiplexer;
use crate::pty::PtyError;
use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Spawn(SessionId, Geometry),
    Write(SessionId, Vec<u8>),
    Resize(SessionId, Geometry),
    Close(SessionId),
}

#[derive(Default)]
struct BackendState {
    calls: Vec<Call>,
    /// Live ids and the generation of their process.
    live: HashMap<SessionId, u64>,
    generation: u64,
    fail_spawn: bool,
    fail_write: bool,
    fail_resize: bool,
    fail_close: bool,
}

pub struct MockBackend {
    state: Mutex<BackendState>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_events().0
    }

    pub fn with_events() -> (Self, BackendEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let backend = Self {
            state: Mutex::new(BackendState::default()),
            events,
        };
        (backend, rx)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    pub fn fail_spawn(&self, fail: bool) {
        self.state().fail_spawn = fail;
    }

    pub fn fail_write(&self, fail: bool) {
        self.state().fail_write = fail;
    }

    pub fn fail_resize(&self, fail: bool) {
        self.state().fail_resize = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.state().fail_close = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn close_count(&self, id: SessionId) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == Call::Close(id))
            .count()
    }

    pub fn writes(&self) -> Vec<(SessionId, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(id, data) => Some((id, data)),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<(SessionId, Geometry)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Resize(id, geometry) => Some((id, geometry)),
                _ => None,
            })
            .collect()
    }

    pub fn emit_output(&self, id: SessionId, data: &[u8]) {
        let _ = self.events.send(BackendEvent::Output {
            id,
            data: data.to_vec(),
        });
    }

    /// Report that the current process for `id` exited.
    pub fn emit_exit(&self, id: SessionId, code: Option<u32>) {
        let generation = self.state().live.remove(&id).unwrap_or_default();
        let _ = self.events.send(BackendEvent::Exited {
            id,
            generation,
            code,
        });
    }
}

impl PtyBackend for MockBackend {
    fn spawn(&self, id: SessionId, geometry: Geometry) -> Result<BackendHandle, PtyError> {
        let mut state = self.state();
        state.calls.push(Call::Spawn(id, geometry));
        if state.fail_spawn {
            return Err(PtyError::SpawnFailed("no PTY available".to_string()));
        }
        state.generation += 1;
        let generation = state.generation;
        state.live.insert(id, generation);
        Ok(BackendHandle {
            session_id: id,
            generation: state.generation,
            pid: Some(1000 + id as u32),
        })
    }

    fn write(&self, id: SessionId, data: &[u8]) -> Result<(), PtyError> {
        let mut state = self.state();
        state.calls.push(Call::Write(id, data.to_vec()));
        if state.fail_write {
            return Err(PtyError::Closed(id));
        }
        if !state.live.contains_key(&id) {
            return Err(PtyError::NotFound(id));
        }
        Ok(())
    }

    fn resize(&self, id: SessionId, geometry: Geometry) -> Result<(), PtyError> {
        let mut state = self.state();
        state.calls.push(Call::Resize(id, geometry));
        if state.fail_resize {
            return Err(PtyError::ResizeFailed("ioctl failed".to_string()));
        }
        if !state.live.contains_key(&id) {
            return Err(PtyError::NotFound(id));
        }
        Ok(())
    }

    fn close(&self, id: SessionId) -> Result<(), PtyError> {
        let mut state = self.state();
        state.calls.push(Call::Close(id));
        state.live.remove(&id);
        if state.fail_close {
            return Err(PtyError::Io(std::io::Error::other("kill failed")));
        }
        Ok(())
    }
}

#[derive(Default)]
struct ProbeState {
    writes: Vec<Vec<u8>>,
    releases: usize,
    disposed: bool,
    focused: bool,
    geometry: Geometry,
    input: Option<InputCallback>,
}

/// Shared view of what happened to a [`MockSurface`], usable after it is gone.
#[derive(Clone, Default)]
pub struct SurfaceProbe(Arc<Mutex<ProbeState>>);

impl SurfaceProbe {
    fn state(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.0.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn output(&self) -> Vec<u8> {
        self.state().writes.concat()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn releases(&self) -> usize {
        self.state().releases
    }

    pub fn disposed(&self) -> bool {
        self.state().disposed
    }

    pub fn focused(&self) -> bool {
        self.state().focused
    }

    pub fn geometry(&self) -> Geometry {
        self.state().geometry
    }
}

pub struct MockSurface {
    probe: SurfaceProbe,
    metrics: CellMetrics,
}

impl MockSurface {
    pub fn new() -> (Self, SurfaceProbe) {
        let probe = SurfaceProbe::default();
        let surface = Self {
            probe: probe.clone(),
            metrics: CellMetrics::new(9, 18),
        };
        (surface, probe)
    }
}

impl RenderSurface for MockSurface {
    fn open(&mut self, viewport: Viewport) {
        self.probe.state().geometry = self.metrics.fit(viewport);
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut state = self.probe.state();
        if !state.disposed {
            state.writes.push(bytes.to_vec());
        }
    }

    fn on_input_bytes(&mut self, callback: InputCallback) -> InputSubscription {
        self.probe.state().input = Some(callback);
        let probe = self.probe.clone();
        InputSubscription::new(move || {
            let mut state = probe.state();
            state.releases += 1;
            state.input = None;
        })
    }

    fn fit_to_container(&mut self, viewport: Viewport) -> Geometry {
        let geometry = self.metrics.fit(viewport);
        self.probe.state().geometry = geometry;
        geometry
    }

    fn current_geometry(&self) -> Geometry {
        self.probe.geometry()
    }

    fn focus(&mut self) {
        self.probe.state().focused = true;
    }

    fn blur(&mut self) {
        self.probe.state().focused = false;
    }

    fn key_input(&mut self, bytes: &[u8]) {
        let mut state = self.probe.state();
        if !state.focused {
            return;
        }
        if let Some(callback) = state.input.as_mut() {
            callback(bytes);
        }
    }

    fn dispose(&mut self) {
        let mut state = self.probe.state();
        state.disposed = true;
        state.focused = false;
        state.input = None;
    }

    fn screen_lines(&self) -> Vec<String> {
        self.probe.output_text().lines().map(String::from).collect()
    }
}

/// Fallback runner that answers from a table and remembers what it ran.
#[derive(Default)]
pub struct CannedRunner {
    responses: Mutex<HashMap<String, RunOutput>>,
    commands: Mutex<Vec<String>>,
}

impl CannedRunner {
    pub fn respond(&self, command: &str, output: RunOutput) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for CannedRunner {
    async fn run_once(&self, command: &str) -> RunOutput {
        self.commands.lock().unwrap().push(command.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default()
    }
}

const SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

/// A multiplexer wired to the doubles, driven by hand instead of a coordinator.
pub struct Harness {
    pub mux: Multiplexer<MockSurface>,
    pub backend: Arc<MockBackend>,
    pub runner: Arc<CannedRunner>,
    events: mpsc::UnboundedReceiver<Event>,
    backend_events: BackendEvents,
    probes: Arc<Mutex<HashMap<SessionId, SurfaceProbe>>>,
}

impl Harness {
    /// 720x432 px container, 80x24 cells.
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn without_backend() -> Self {
        Self::build(false)
    }

    fn build(with_backend: bool) -> Self {
        let (backend, backend_events) = MockBackend::with_events();
        let backend = Arc::new(backend);
        let runner = Arc::new(CannedRunner::default());
        let probes: Arc<Mutex<HashMap<SessionId, SurfaceProbe>>> = Arc::default();

        let registry = Arc::clone(&probes);
        let (mux, events) = Multiplexer::new(
            Viewport::new(720, 432),
            with_backend.then(|| Arc::clone(&backend) as Arc<dyn PtyBackend>),
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Box::new(move |id| {
                let (surface, probe) = MockSurface::new();
                registry.lock().unwrap().insert(id, probe);
                surface
            }),
        );

        Self {
            mux,
            backend,
            runner,
            events,
            backend_events,
            probes,
        }
    }

    /// Process queued events until nothing arrives for a short while.
    pub async fn settle(&mut self) {
        loop {
            let events = &mut self.events;
            let backend_events = &mut self.backend_events;
            let next = tokio::time::timeout(SETTLE_TIMEOUT, async move {
                tokio::select! {
                    Some(event) = events.recv() => Some(event),
                    Some(event) = backend_events.recv() => Some(Event::Backend(event)),
                    else => None,
                }
            })
            .await;

            match next {
                Ok(Some(event)) => {
                    let _ = self.mux.handle_event(event);
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    pub fn probe(&self, id: SessionId) -> SurfaceProbe {
        self.probes
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.mux.registry().lookup(id).map(|session| session.status())
    }
}
