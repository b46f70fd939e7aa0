// Workflow Triggers - Event types that can trigger rule execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Actor;

/// Types of events that can trigger automation rules.
///
/// The closed vocabulary drives both trigger dispatch routing and the
/// scheduled sweeps that synthesize time-based events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Client lifecycle
    ClientCreated,
    ClientUpdated,
    ClientStatusChanged,

    // Pipeline stage
    StageEntered,
    StageExited,

    // Document lifecycle
    DocumentUploaded,
    DocumentSigned,
    DocumentExpired,
    DocumentDueDate,

    // Task lifecycle
    TaskCreated,
    TaskCompleted,
    TaskOverdue,
    TaskDue,

    // Notes
    NoteAdded,

    // Time/date based (produced by the scheduled sweeps)
    Scheduled,
    DateBased,
    TimeInStageThreshold,
    ClientInactivity,

    // External / manual
    Manual,
    Webhook,
}

/// Payload for trigger events.
pub type EventPayload = serde_json::Value;

/// A trigger event that can initiate rule execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    pub subject_id: Option<Uuid>,
    pub actor: Option<Actor>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            subject_id: None,
            actor: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject_id: Uuid) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Create a client created event.
    pub fn client_created(client_id: Uuid, client_name: &str) -> Self {
        Self::new(
            TriggerType::ClientCreated,
            serde_json::json!({
                "client_id": client_id,
                "client_name": client_name,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a client status changed event.
    pub fn client_status_changed(client_id: Uuid, old_status: &str, new_status: &str) -> Self {
        Self::new(
            TriggerType::ClientStatusChanged,
            serde_json::json!({
                "client_id": client_id,
                "old_status": old_status,
                "new_status": new_status,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a stage entered event.
    pub fn stage_entered(client_id: Uuid, stage: &str) -> Self {
        Self::new(
            TriggerType::StageEntered,
            serde_json::json!({
                "client_id": client_id,
                "stage": stage,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a document expired event.
    pub fn document_expired(document_id: Uuid, client_id: Uuid, days_since_expiry: i64) -> Self {
        Self::new(
            TriggerType::DocumentExpired,
            serde_json::json!({
                "document_id": document_id,
                "client_id": client_id,
                "days_since_expiry": days_since_expiry,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a document due date approaching event.
    pub fn document_due(document_id: Uuid, client_id: Uuid, days_until_due: i64) -> Self {
        Self::new(
            TriggerType::DocumentDueDate,
            serde_json::json!({
                "document_id": document_id,
                "client_id": client_id,
                "days_until_due": days_until_due,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a task overdue event.
    pub fn task_overdue(task_id: Uuid, client_id: Uuid, days_overdue: i64) -> Self {
        Self::new(
            TriggerType::TaskOverdue,
            serde_json::json!({
                "task_id": task_id,
                "client_id": client_id,
                "days_overdue": days_overdue,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a task due soon event.
    pub fn task_due(task_id: Uuid, client_id: Uuid, days_until_due: i64) -> Self {
        Self::new(
            TriggerType::TaskDue,
            serde_json::json!({
                "task_id": task_id,
                "client_id": client_id,
                "days_until_due": days_until_due,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a time-in-stage threshold event.
    pub fn time_in_stage(client_id: Uuid, stage: &str, days_in_stage: i64) -> Self {
        Self::new(
            TriggerType::TimeInStageThreshold,
            serde_json::json!({
                "client_id": client_id,
                "stage": stage,
                "days_in_stage": days_in_stage,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a client inactivity event.
    pub fn client_inactivity(client_id: Uuid, days_inactive: i64) -> Self {
        Self::new(
            TriggerType::ClientInactivity,
            serde_json::json!({
                "client_id": client_id,
                "days_inactive": days_inactive,
            }),
        )
        .with_subject(client_id)
    }

    /// Create a webhook received event from an authenticated delivery.
    pub fn webhook(rule_id: Uuid, payload: EventPayload) -> Self {
        Self::new(
            TriggerType::Webhook,
            serde_json::json!({
                "rule_id": rule_id,
                "payload": payload,
            }),
        )
    }
}
