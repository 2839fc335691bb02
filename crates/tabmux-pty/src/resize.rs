//! Keeps backend PTY sizes in step with the visible surface.

use tabmux_vt::{Geometry, RenderSurface, Viewport};

use crate::backend::SessionId;
use crate::multiplexer::Multiplexer;

impl<S: RenderSurface> Multiplexer<S> {
    /// The container changed size. Only the visible tab follows; hidden tabs
    /// catch up when they are shown again.
    pub fn viewport_changed(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        if let Some(id) = self.active {
            self.sync_geometry(id);
        }
    }

    /// Re-fit the surface of `id` and push its geometry to the backend.
    ///
    /// Resize failures are dropped; the next viewport change corrects them.
    pub(crate) fn sync_geometry(&mut self, id: SessionId) {
        let viewport = self.viewport;
        let Some(session) = self.registry.lookup_mut(id) else {
            return;
        };
        let geometry = session.surface_mut().fit_to_container(viewport);
        if !session.is_live() {
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };
        match backend.resize(id, geometry) {
            Ok(()) => session.set_geometry(geometry),
            Err(e) => log::debug!("resize of tab {id} to {geometry} failed: {e}"),
        }
    }

    /// Record the spawn size and correct it if the visible tab's container
    /// changed while the shell was starting.
    pub(crate) fn after_spawn(&mut self, id: SessionId, spawned_at: Geometry) {
        let visible = self.active == Some(id);
        let Some(session) = self.registry.lookup_mut(id) else {
            return;
        };
        session.set_geometry(spawned_at);
        if visible && session.surface().current_geometry() != spawned_at {
            self.sync_geometry(id);
        }
    }
}
