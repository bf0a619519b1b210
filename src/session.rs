//! Session and replay state.
//!
//! One `SessionService` is built at startup and shared through `AppState`.
//! Both maps live behind a single `tokio::sync::Mutex` and a request holds
//! that lock for its whole turn (lookup, state machine, incident write,
//! replay write-through), so session mutations and replay entries can never
//! disagree.  This serializes all USSD turns globally, which is the
//! simplest-correct arrangement for the expected traffic; sharding the lock
//! per session id is the known escape hatch if throughput ever demands it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::flow::MenuState;
use crate::UssdResponse;

type Map<V> = HashMap<String, V, ahash::RandomState>;

/// Incident fields collected so far, filled in one per dialog step.
#[derive(Debug, Clone, Default)]
pub struct IncidentDraft {
    pub category: Option<String>,
    pub location: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
}

/// One subscriber's in-progress dialog.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub phone_number: String,
    pub state: MenuState,
    pub incident: IncidentDraft,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: String, phone_number: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            phone_number,
            state: MenuState::Initial,
            incident: IncidentDraft::default(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now > self.last_active + ttl
    }

    /// Refresh `last_active`; called on every turn that reaches the state
    /// machine.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Last payload sent for a session, replayed verbatim when a gateway
/// redelivers the initial dial.
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub payload: UssdResponse,
    pub stored_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ServiceInner {
    sessions: Map<Session>,
    replay: Map<ReplayEntry>,
}

impl ServiceInner {
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Commit a session, replacing any previous entry for its id.
    pub fn put_session(&mut self, session: Session) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Drop a session and its replay entry.
    pub fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.replay.remove(session_id);
    }

    /// A replay payload younger than `ttl`, if any.  A stale entry is purged
    /// on lookup rather than served.
    pub fn fresh_replay(
        &mut self,
        session_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<UssdResponse> {
        let entry = self.replay.get(session_id)?;
        if now - entry.stored_at <= ttl {
            return Some(entry.payload.clone());
        }
        self.replay.remove(session_id);
        None
    }

    pub fn store_replay(&mut self, session_id: &str, payload: UssdResponse, now: DateTime<Utc>) {
        self.replay.insert(
            session_id.to_string(),
            ReplayEntry {
                payload,
                stored_at: now,
            },
        );
    }

    /// Evict expired sessions (cascading their replay entries) and stale
    /// replay entries.  Returns `(sessions_removed, replays_removed)`.
    pub fn sweep(
        &mut self,
        session_ttl: Duration,
        replay_ttl: Duration,
        now: DateTime<Utc>,
    ) -> (usize, usize) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(session_ttl, now))
            .map(|(id, _)| id.clone())
            .collect();
        let mut replays_removed = 0;
        for id in &expired {
            self.sessions.remove(id);
            if self.replay.remove(id).is_some() {
                replays_removed += 1;
            }
        }

        let stale: Vec<String> = self
            .replay
            .iter()
            .filter(|(_, e)| now - e.stored_at > replay_ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.replay.remove(id);
        }
        replays_removed += stale.len();

        (expired.len(), replays_removed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn replay_count(&self) -> usize {
        self.replay.len()
    }
}

/// Shared owner of the session and replay maps plus their TTLs.
pub struct SessionService {
    inner: Mutex<ServiceInner>,
    session_ttl: Duration,
    replay_ttl: Duration,
}

impl SessionService {
    pub fn new(session_ttl: Duration, replay_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(ServiceInner::default()),
            session_ttl,
            replay_ttl,
        }
    }

    /// Take the service lock for one request's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, ServiceInner> {
        self.inner.lock().await
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn replay_ttl(&self) -> Duration {
        self.replay_ttl
    }

    /// One cleanup pass over both maps.
    pub async fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        self.inner
            .lock()
            .await
            .sweep(self.session_ttl, self.replay_ttl, now)
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.session_count()
    }
}
