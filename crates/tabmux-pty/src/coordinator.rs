//! Single-owner event loop around a [`Multiplexer`].
//!
//! Backend output, surface input and front-end requests are all funnelled
//! into one task, so registry mutation is never concurrent.

use tabmux_vt::{RenderSurface, Viewport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{BackendEvent, BackendEvents, SessionId};
use crate::event::{Event, Inbox, Reply, Request, SessionSnapshot, TabInfo};
use crate::multiplexer::{Multiplexer, MuxError};

pub struct Coordinator<S> {
    mux: Multiplexer<S>,
    events: mpsc::UnboundedReceiver<Event>,
    backend_events: Option<BackendEvents>,
}

enum Next {
    Event(Event),
    BackendClosed,
    Stopped,
}

impl<S: RenderSurface> Coordinator<S> {
    pub fn new(
        mux: Multiplexer<S>,
        events: mpsc::UnboundedReceiver<Event>,
        backend_events: Option<BackendEvents>,
    ) -> Self {
        Self {
            mux,
            events,
            backend_events,
        }
    }

    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            inbox: self.mux.inbox.clone(),
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> (MuxHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Handle events until the multiplexer shuts down.
    pub async fn run(mut self) {
        loop {
            let next = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => Next::Event(event),
                    None => Next::Stopped,
                },
                event = next_backend_event(&mut self.backend_events) => match event {
                    Some(event) => Next::Event(Event::Backend(event)),
                    None => Next::BackendClosed,
                },
            };

            match next {
                Next::Event(event) => {
                    if self.mux.handle_event(event).is_break() {
                        break;
                    }
                }
                Next::BackendClosed => {
                    log::debug!("backend event stream closed");
                    self.backend_events = None;
                }
                Next::Stopped => break,
            }
        }
        log::debug!("coordinator stopped");
    }
}

async fn next_backend_event(events: &mut Option<BackendEvents>) -> Option<BackendEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable front-end API for a running [`Coordinator`].
///
/// Every call fails with [`MuxError::Stopped`] once the coordinator is gone.
#[derive(Debug, Clone)]
pub struct MuxHandle {
    inbox: Inbox,
}

impl MuxHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, MuxError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| MuxError::Stopped)
    }

    fn send(&self, request: Request) -> Result<(), MuxError> {
        self.inbox
            .send(Event::Request(request))
            .map_err(|_| MuxError::Stopped)
    }

    pub async fn open_tab(&self) -> Result<SessionId, MuxError> {
        self.request(|reply| Request::OpenTab { reply }).await
    }

    pub async fn close_tab(&self, id: SessionId) -> Result<(), MuxError> {
        self.request(|reply| Request::CloseTab { id, reply }).await?
    }

    pub async fn activate(&self, id: SessionId) -> Result<(), MuxError> {
        self.request(|reply| Request::Activate { id, reply }).await?
    }

    pub async fn run_command(&self, command: impl Into<String>) -> Result<(), MuxError> {
        let command = command.into();
        self.request(|reply| Request::RunCommand { command, reply })
            .await?
    }

    /// Type into the active tab.
    pub fn keystrokes(&self, data: impl Into<Vec<u8>>) -> Result<(), MuxError> {
        self.send(Request::Keystrokes { data: data.into() })
    }

    pub fn resize_viewport(&self, viewport: Viewport) -> Result<(), MuxError> {
        self.send(Request::Viewport { viewport })
    }

    pub async fn snapshot(&self, id: SessionId) -> Result<Option<SessionSnapshot>, MuxError> {
        self.request(|reply| Request::Snapshot { id, reply }).await
    }

    pub async fn tabs(&self) -> Result<Vec<TabInfo>, MuxError> {
        self.request(|reply| Request::Tabs { reply }).await
    }

    /// Tear down every tab and stop the coordinator.
    pub async fn shutdown(&self) -> Result<(), MuxError> {
        self.request(|reply| Request::Shutdown { reply }).await
    }
}
