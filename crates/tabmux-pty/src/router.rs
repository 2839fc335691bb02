//! Moves bytes between backend processes and rendering surfaces.

use tabmux_vt::RenderSurface;

use crate::backend::{BackendEvent, SessionId};
use crate::multiplexer::Multiplexer;

impl<S: RenderSurface> Multiplexer<S> {
    /// Deliver a backend event to the surface of the session it is tagged with.
    ///
    /// Events for sessions that are no longer registered are dropped: they are
    /// stragglers from a process that raced with its tab closing.
    pub(crate) fn route_output(&mut self, event: BackendEvent) {
        let id = event.session_id();
        let Some(session) = self.registry.lookup_mut(id) else {
            log::debug!("dropping backend event for closed tab {id}");
            return;
        };

        match event {
            BackendEvent::Output { data, .. } => session.write_output(&data),
            BackendEvent::Exited { generation, code, .. } => {
                if session.backend().is_some_and(|bound| bound.generation != generation) {
                    log::debug!("ignoring exit of superseded shell for tab {id}");
                    return;
                }
                session.backend_exited(generation);
                let code = code.map_or_else(|| "unknown".to_string(), |code| code.to_string());
                session.write_output(format!("\r\n[process exited with code {code}]\r\n").as_bytes());
            }
        }
    }

    /// Forward bytes a surface emitted to that session's backend process.
    ///
    /// Only the focused surface forwards keystrokes, so user typing always
    /// lands in the active tab; terminal replies go back to the process that
    /// asked for them.
    pub(crate) fn route_input(&mut self, id: SessionId, data: &[u8]) {
        let Some(session) = self.registry.lookup(id) else {
            log::debug!("dropping input for closed tab {id}");
            return;
        };
        if !session.is_live() {
            log::trace!("tab {id} has no live shell; dropping {} input bytes", data.len());
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = backend.write(id, data) {
            log::warn!("failed to write input to tab {id}: {e}");
        }
    }

    /// User typing, delivered to the active tab's surface.
    pub fn keystrokes(&mut self, data: &[u8]) {
        let Some(id) = self.active else {
            log::debug!("no active tab for {} typed bytes", data.len());
            return;
        };
        if let Some(session) = self.registry.lookup_mut(id) {
            session.surface_mut().key_input(data);
        }
    }
}

/// Convert bare `\n` to `\r\n`.
///
/// `pending_cr` carries whether the previous chunk ended in `\r`, so a
/// `\r\n` pair split across two chunks is left alone.
pub(crate) fn normalize_newlines(data: &[u8], pending_cr: &mut bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    let mut prev_cr = *pending_cr;
    for &byte in data {
        if byte == b'\n' && !prev_cr {
            out.push(b'\r');
        }
        out.push(byte);
        prev_cr = byte == b'\r';
    }
    *pending_cr = prev_cr;
    out
}
