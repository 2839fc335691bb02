//! Wires configuration into a running coordinator and waits on tab state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tabmux_pty::{
    Coordinator, Multiplexer, MuxError, MuxHandle, NativeBackend, PtyBackend, SessionId,
    SessionSnapshot, SessionStatus, ShellRunner, SurfaceFactory,
};
use tabmux_vt::VtSurface;
use tokio::task::JoinHandle;

use crate::config::{BackendChoice, Config};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A running multiplexer plus the task that drives it.
pub struct Frontend {
    pub handle: MuxHandle,
    task: JoinHandle<()>,
}

impl Frontend {
    pub fn start(config: &Config, choice: BackendChoice) -> Self {
        let metrics = config.surface.metrics();
        let scrollback = config.surface.scrollback;
        let surfaces: SurfaceFactory<VtSurface> =
            Box::new(move |_| VtSurface::new(metrics, scrollback));
        let runner = Arc::new(ShellRunner::new(config.shell.working_dir.clone()));

        let (backend, backend_events) = match choice {
            BackendChoice::Fallback => (None, None),
            BackendChoice::Auto | BackendChoice::Native => {
                let (backend, events) = NativeBackend::new(config.shell.to_spec());
                (Some(Arc::new(backend) as Arc<dyn PtyBackend>), Some(events))
            }
        };
        log::info!("starting with {choice:?} backend at {}", config.window.viewport());

        let (mux, events) = Multiplexer::new(config.window.viewport(), backend, runner, surfaces);
        let (handle, task) = Coordinator::new(mux, events, backend_events).spawn();
        Self { handle, task }
    }

    /// Open a tab and wait until its shell is either live or known to be absent.
    pub async fn open_ready(&self, limit: Duration) -> Result<SessionSnapshot, MuxError> {
        let id = self.handle.open_tab().await?;
        wait_ready(&self.handle, id, limit).await
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.handle.shutdown().await?;
        self.task.await?;
        Ok(())
    }
}

/// Poll until the tab leaves the pending state or `limit` passes.
pub async fn wait_ready(
    handle: &MuxHandle,
    id: SessionId,
    limit: Duration,
) -> Result<SessionSnapshot, MuxError> {
    let deadline = Instant::now() + limit;
    loop {
        let snapshot = handle.snapshot(id).await?.ok_or(MuxError::UnknownTab(id))?;
        if snapshot.status != SessionStatus::Pending || Instant::now() >= deadline {
            return Ok(snapshot);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll until the tab's screen has not changed for `quiet`, or `limit` passes.
///
/// A tab with a fallback command still running is never quiet: its output
/// only appears once the command finishes.
pub async fn wait_for_quiet(
    handle: &MuxHandle,
    id: SessionId,
    quiet: Duration,
    limit: Duration,
) -> Result<SessionSnapshot, MuxError> {
    let deadline = Instant::now() + limit;
    let mut last = handle.snapshot(id).await?.ok_or(MuxError::UnknownTab(id))?;
    let mut stable_since = Instant::now();
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let snapshot = handle.snapshot(id).await?.ok_or(MuxError::UnknownTab(id))?;
        if snapshot != last || snapshot.command_in_flight {
            last = snapshot;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= quiet {
            return Ok(last);
        }
        if Instant::now() >= deadline {
            log::debug!("tab {id} still changing after {limit:?}");
            return Ok(last);
        }
    }
}
