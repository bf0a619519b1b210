//! Incident record storage.
//!
//! The USSD flow only ever needs three operations against durable storage:
//! resolve a subscriber to a user record (creating it on first contact),
//! persist a submitted incident, and list a subscriber's most recent
//! incidents.  `IncidentStore` captures exactly that surface so the state
//! machine stays decoupled from whatever backs it.  `MemoryIncidentStore`
//! is the in-process implementation used by the default binary and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Opaque identifier for a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// A stored incident report.
#[derive(Debug, Clone)]
pub struct Incident {
    pub reference: String,
    pub category: String,
    pub location: String,
    pub severity: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
}

impl Incident {
    /// Multi-line summary shown when a subscriber drills into a report.
    pub fn summary(&self) -> String {
        format!(
            "Ref: {}\nCategory: {}\nLocation: {}\nSeverity: {}\nDate: {}",
            self.reference,
            self.category,
            self.location,
            self.severity,
            self.created_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Fields collected over a dialog, ready to persist.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub reference: String,
    pub category: String,
    pub location: String,
    pub severity: String,
    pub description: String,
    pub user_id: UserId,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("incident store unavailable: {0}")]
    Unavailable(String),
}

/// Narrow storage interface consumed by the state machine.
#[async_trait::async_trait]
pub trait IncidentStore: Send + Sync {
    /// Return the user record for a phone number, creating it if absent.
    async fn find_or_create_user(&self, phone_number: &str) -> Result<UserId, StoreError>;

    async fn create_incident(&self, incident: NewIncident) -> Result<(), StoreError>;

    /// The subscriber's incidents, most recent first, at most `limit`.
    async fn recent_incidents(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, UserId>,
    incidents: Vec<Incident>,
    next_user: u64,
}

/// In-memory store.  Incidents are appended in creation order, so a reverse
/// scan yields most-recent-first.
#[derive(Default)]
pub struct MemoryIncidentStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored incidents, for tests and health reporting.
    pub fn incident_count(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").incidents.len()
    }
}

#[async_trait::async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn find_or_create_user(&self, phone_number: &str) -> Result<UserId, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(id) = inner.users.get(phone_number) {
            return Ok(*id);
        }
        let id = UserId(inner.next_user);
        inner.next_user += 1;
        inner.users.insert(phone_number.to_string(), id);
        Ok(id)
    }

    async fn create_incident(&self, incident: NewIncident) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.incidents.push(Incident {
            reference: incident.reference,
            category: incident.category,
            location: incident.location,
            severity: incident.severity,
            description: incident.description,
            created_at: Utc::now(),
            user_id: incident.user_id,
        });
        Ok(())
    }

    async fn recent_incidents(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let Some(id) = inner.users.get(phone_number).copied() else {
            return Ok(Vec::new());
        };
        Ok(inner
            .incidents
            .iter()
            .rev()
            .filter(|i| i.user_id == id)
            .take(limit)
            .cloned()
            .collect())
    }
}
