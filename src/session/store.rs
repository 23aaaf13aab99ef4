//! In-memory session store

use super::{ChatMessage, Session};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("A reply is already being generated for session {0}")]
    Busy(Uuid),
}

/// Read-only copy of a session, readable while a cycle holds the lock
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub has_credential: bool,
}

impl SessionSnapshot {
    fn of(session: &Session) -> Self {
        Self {
            messages: session.transcript.messages().to_vec(),
            has_credential: session.credential.is_present(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    session: Arc<Mutex<Session>>,
    snapshot: SessionSnapshot,
    last_active: Instant,
}

/// Sessions by id, each behind its own lock so one cycle runs at a time
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Entry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session and return its id
    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        let entry = Entry {
            snapshot: SessionSnapshot::of(&session),
            session: Arc::new(Mutex::new(session)),
            last_active: Instant::now(),
        };
        self.sessions.insert(id, entry);
        tracing::debug!(session = %id, "Session created");
        id
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<Mutex<Session>>, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or(SessionError::NotFound(*id))?;
        entry.last_active = Instant::now();
        Ok(Arc::clone(&entry.session))
    }

    /// Lock a session without waiting
    ///
    /// Fails with [`SessionError::Busy`] while another cycle holds it.
    pub fn try_lock(&self, id: &Uuid) -> Result<OwnedMutexGuard<Session>, SessionError> {
        self.get(id)?
            .try_lock_owned()
            .map_err(|_| SessionError::Busy(*id))
    }

    /// Record the current state of `session` as its snapshot
    pub fn publish(&self, session: &Session) {
        if let Some(mut entry) = self.sessions.get_mut(&session.id) {
            entry.snapshot = SessionSnapshot::of(session);
            entry.last_active = Instant::now();
        }
    }

    /// The last published state, as of the end of the previous cycle
    pub fn snapshot(&self, id: &Uuid) -> Result<SessionSnapshot, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(SessionError::NotFound(*id))
    }

    /// End a session, destroying its transcript
    ///
    /// A session with a cycle in flight is [`SessionError::Busy`] and stays.
    pub fn remove(&self, id: &Uuid) -> Result<(), SessionError> {
        let _guard = self.try_lock(id)?;
        self.sessions.remove(id);
        tracing::debug!(session = %id, "Session removed");
        Ok(())
    }

    /// Drop sessions idle for at least `max_idle`; returns how many went
    ///
    /// Sessions with a cycle in flight are kept regardless of age.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.sessions.retain(|_, entry| {
            let idle = now.duration_since(entry.last_active) >= max_idle;
            let keep = !idle || entry.session.try_lock().is_err();
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
