use std::collections::HashMap;

use crate::backend::SessionId;
use crate::session::Session;

/// Ownership table from session id to [`Session`].
///
/// The registry performs no lifecycle validation; the multiplexer decides
/// when sessions are added and removed. All access happens on the
/// coordinator task, so no locking is needed.
pub struct Registry<S> {
    sessions: HashMap<SessionId, Session<S>>,
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Insert `session` under its own id, returning any session it replaced.
    pub fn register(&mut self, session: Session<S>) -> Option<Session<S>> {
        self.sessions.insert(session.id(), session)
    }

    /// Remove and return the session for `id`, if any.
    pub fn unregister(&mut self, id: SessionId) -> Option<Session<S>> {
        self.sessions.remove(&id)
    }

    pub fn lookup(&self, id: SessionId) -> Option<&Session<S>> {
        self.sessions.get(&id)
    }

    pub fn lookup_mut(&mut self, id: SessionId) -> Option<&mut Session<S>> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}
