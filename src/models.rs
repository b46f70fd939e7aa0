//! Domain read model consumed by conditions and scheduled sweeps.
//!
//! These are projections of the CRM's records, not the records themselves:
//! the engine only ever reads them, all mutation happens through action
//! handlers owned by the surrounding application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub stage: Option<String>,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A document still awaiting action. Received, signed, or archived
    /// documents no longer participate in due-date triggers.
    pub fn is_open(&self) -> bool {
        !matches!(self.status.as_str(), "received" | "signed" | "archived")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskItem {
    pub fn is_open(&self) -> bool {
        !matches!(self.status.as_str(), "completed" | "cancelled")
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_date.map(|due| due < now).unwrap_or(false)
    }
}

/// A financial scenario attached to a client (projection, quote, plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub amount: f64,
}

/// The user (or system identity) responsible for the originating event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: String,
}
