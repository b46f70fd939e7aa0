//! Store abstractions the engine is written against.
//!
//! The relational persistence layer is an external collaborator; the engine
//! only needs these read/write contracts. `memory` provides in-process
//! implementations used by tests and embedded deployments.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{Client, Document, Scenario, TaskItem};
use crate::workflows::definition::{Rule, RuleChanges, RuleDraft, RuleVersion};
use crate::workflows::executor::{ExecutionRecord, ExecutionStatus, StepLogEntry};
use crate::workflows::triggers::TriggerType;

/// Read-only access to the CRM's domain records.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn client(&self, id: Uuid) -> EngineResult<Option<Client>>;
    async fn client_exists(&self, id: Uuid) -> EngineResult<bool>;
    async fn documents_for(&self, client_id: Uuid) -> EngineResult<Vec<Document>>;
    async fn tasks_for(&self, client_id: Uuid) -> EngineResult<Vec<TaskItem>>;
    async fn scenarios_for(&self, client_id: Uuid) -> EngineResult<Vec<Scenario>>;

    // Page-bounded scans for the scheduled sweeps.

    /// Clients whose current stage was entered at or before `cutoff`.
    async fn clients_in_stage_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Client>>;

    /// Clients whose last recorded activity is at or before `cutoff`.
    async fn clients_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Client>>;

    /// Open documents due at or before `cutoff`.
    async fn documents_due_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Document>>;

    /// Documents whose expiry passed at or before `cutoff`.
    async fn documents_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Document>>;

    /// Open tasks due at or before `cutoff`.
    async fn open_tasks_due_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<TaskItem>>;
}

/// Rule persistence, including the append-only version history.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(&self, id: Uuid) -> EngineResult<Option<Rule>>;

    /// Active rules whose trigger type equals `trigger`, in creation order.
    async fn active_for_trigger(&self, trigger: TriggerType) -> EngineResult<Vec<Rule>>;

    /// Validates the draft and persists a new rule at version 1.
    async fn create(&self, draft: RuleDraft) -> EngineResult<Rule>;

    /// Applies changes; if versioned content (actions, conditions, trigger
    /// config) is touched, the prior contents are archived as an immutable
    /// snapshot first and the version number is bumped.
    async fn update(&self, id: Uuid, changes: RuleChanges) -> EngineResult<Rule>;

    /// Archived snapshots, oldest first. Never rewritten.
    async fn versions(&self, id: Uuid) -> EngineResult<Vec<RuleVersion>>;
}

/// Durable execution records and their step logs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, record: ExecutionRecord) -> EngineResult<()>;
    async fn get(&self, id: Uuid) -> EngineResult<Option<ExecutionRecord>>;

    /// Live status, re-read between steps so external cancel/pause requests
    /// take effect mid-run.
    async fn status(&self, id: Uuid) -> EngineResult<Option<ExecutionStatus>>;

    async fn set_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> EngineResult<()>;

    /// Crash-recovery checkpoint, persisted before each step executes.
    async fn set_current_step(&self, id: Uuid, step: usize) -> EngineResult<()>;

    /// Appends a step log entry immediately (not batched). Idempotent per
    /// (step index, parallel index): re-appending the same slot replaces it.
    async fn append_step_log(&self, id: Uuid, entry: StepLogEntry) -> EngineResult<()>;

    async fn for_rule(&self, rule_id: Uuid) -> EngineResult<Vec<ExecutionRecord>>;
}
