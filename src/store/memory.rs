//! In-process store implementations backed by `HashMap`s behind async
//! locks. Used by the test suite and by embedded single-process
//! deployments that do not carry a relational database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DomainStore, ExecutionStore, RuleStore};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::models::{Client, Document, Scenario, TaskItem};
use crate::workflows::definition::{Rule, RuleChanges, RuleDraft, RuleVersion};
use crate::workflows::executor::{ExecutionRecord, ExecutionStatus, StepLogEntry};
use crate::workflows::triggers::TriggerType;

/// Domain records for condition evaluation and sweep scans.
#[derive(Default)]
pub struct InMemoryDomainStore {
    clients: RwLock<HashMap<Uuid, Client>>,
    documents: RwLock<HashMap<Uuid, Document>>,
    tasks: RwLock<HashMap<Uuid, TaskItem>>,
    scenarios: RwLock<HashMap<Uuid, Scenario>>,
}

impl InMemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_client(&self, client: Client) {
        self.clients.write().await.insert(client.id, client);
    }

    pub async fn put_document(&self, document: Document) {
        self.documents.write().await.insert(document.id, document);
    }

    pub async fn put_task(&self, task: TaskItem) {
        self.tasks.write().await.insert(task.id, task);
    }

    pub async fn put_scenario(&self, scenario: Scenario) {
        self.scenarios.write().await.insert(scenario.id, scenario);
    }
}

/// Deterministic scan order for page-bounded queries.
fn sorted_by_id<T: Clone>(map: &HashMap<Uuid, T>) -> Vec<(Uuid, T)> {
    let mut items: Vec<(Uuid, T)> = map.iter().map(|(k, v)| (*k, v.clone())).collect();
    items.sort_by_key(|(id, _)| *id);
    items
}

#[async_trait]
impl DomainStore for InMemoryDomainStore {
    async fn client(&self, id: Uuid) -> EngineResult<Option<Client>> {
        Ok(self.clients.read().await.get(&id).cloned())
    }

    async fn client_exists(&self, id: Uuid) -> EngineResult<bool> {
        Ok(self.clients.read().await.contains_key(&id))
    }

    async fn documents_for(&self, client_id: Uuid) -> EngineResult<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn tasks_for(&self, client_id: Uuid) -> EngineResult<Vec<TaskItem>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn scenarios_for(&self, client_id: Uuid) -> EngineResult<Vec<Scenario>> {
        Ok(self
            .scenarios
            .read()
            .await
            .values()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn clients_in_stage_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Client>> {
        let clients = self.clients.read().await;
        Ok(sorted_by_id(&clients)
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.stage.is_some())
            .filter(|c| c.stage_entered_at.is_some_and(|at| at <= cutoff))
            .take(limit)
            .collect())
    }

    async fn clients_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Client>> {
        let clients = self.clients.read().await;
        Ok(sorted_by_id(&clients)
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.last_activity_at.is_some_and(|at| at <= cutoff))
            .take(limit)
            .collect())
    }

    async fn documents_due_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Document>> {
        let documents = self.documents.read().await;
        Ok(sorted_by_id(&documents)
            .into_iter()
            .map(|(_, d)| d)
            .filter(|d| d.is_open())
            .filter(|d| d.due_date.is_some_and(|at| at <= cutoff))
            .take(limit)
            .collect())
    }

    async fn documents_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Document>> {
        let documents = self.documents.read().await;
        Ok(sorted_by_id(&documents)
            .into_iter()
            .map(|(_, d)| d)
            .filter(|d| d.expires_at.is_some_and(|at| at <= cutoff))
            .take(limit)
            .collect())
    }

    async fn open_tasks_due_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<TaskItem>> {
        let tasks = self.tasks.read().await;
        Ok(sorted_by_id(&tasks)
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| t.is_open())
            .filter(|t| t.due_date.is_some_and(|at| at <= cutoff))
            .take(limit)
            .collect())
    }
}

/// Rules plus their append-only version archive.
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<Uuid, Rule>>,
    versions: RwLock<HashMap<Uuid, Vec<RuleVersion>>>,
    /// Creation order, for stable `active_for_trigger` output.
    order: RwLock<Vec<Uuid>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRuleStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            clock,
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn get(&self, id: Uuid) -> EngineResult<Option<Rule>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn active_for_trigger(&self, trigger: TriggerType) -> EngineResult<Vec<Rule>> {
        let rules = self.rules.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| rules.get(id))
            .filter(|r| r.is_active && r.trigger_type == trigger)
            .cloned()
            .collect())
    }

    async fn create(&self, draft: RuleDraft) -> EngineResult<Rule> {
        draft.validate()?;
        let rule = Rule {
            id: Uuid::new_v4(),
            name: draft.name,
            is_active: draft.is_active,
            trigger_type: draft.trigger_type,
            trigger_config: draft.trigger_config,
            conditions: draft.conditions,
            actions: draft.actions,
            webhook_secret: draft.webhook_secret,
            version: 1,
            created_at: self.clock.now(),
            updated_at: None,
        };
        self.order.write().await.push(rule.id);
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, id: Uuid, changes: RuleChanges) -> EngineResult<Rule> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("rule {id}")))?;
        let now = self.clock.now();

        if changes.touches_versioned_content() {
            self.versions
                .write()
                .await
                .entry(id)
                .or_default()
                .push(rule.snapshot(now));
            rule.version += 1;
        }

        if let Some(name) = changes.name {
            rule.name = name;
        }
        if let Some(trigger_config) = changes.trigger_config {
            rule.trigger_config = trigger_config;
        }
        if let Some(conditions) = changes.conditions {
            rule.conditions = conditions;
        }
        if let Some(actions) = changes.actions {
            if actions.is_empty() {
                return Err(EngineError::Validation(
                    "rule must have at least one action step".into(),
                ));
            }
            rule.actions = actions;
        }
        if let Some(is_active) = changes.is_active {
            rule.is_active = is_active;
        }
        rule.updated_at = Some(now);
        Ok(rule.clone())
    }

    async fn versions(&self, id: Uuid) -> EngineResult<Vec<RuleVersion>> {
        Ok(self
            .versions
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Execution records with immediately visible step logs.
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, ExecutionRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryExecutionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, record: ExecutionRecord) -> EngineResult<()> {
        self.executions.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<ExecutionRecord>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn status(&self, id: Uuid) -> EngineResult<Option<ExecutionStatus>> {
        Ok(self.executions.read().await.get(&id).map(|r| r.status))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))?;
        record.status = status;
        if status.is_terminal() {
            record.completed_at = Some(self.clock.now());
        }
        if error.is_some() {
            record.error = error;
        }
        Ok(())
    }

    async fn set_current_step(&self, id: Uuid, step: usize) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))?;
        record.current_step = step;
        Ok(())
    }

    async fn append_step_log(&self, id: Uuid, entry: StepLogEntry) -> EngineResult<()> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))?;
        // Replaying a step after crash recovery overwrites its slot rather
        // than growing the log.
        if let Some(existing) = record
            .steps
            .iter_mut()
            .find(|s| s.step_index == entry.step_index && s.parallel_index == entry.parallel_index)
        {
            *existing = entry;
        } else {
            record.steps.push(entry);
        }
        Ok(())
    }

    async fn for_rule(&self, rule_id: Uuid) -> EngineResult<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .read()
            .await
            .values()
            .filter(|r| r.rule_id == rule_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::workflows::actions::{ActionStep, ActionType};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            "2026-03-01T09:00:00Z".parse().unwrap(),
        ))
    }

    fn draft(name: &str) -> RuleDraft {
        RuleDraft {
            name: name.into(),
            trigger_type: TriggerType::ClientCreated,
            trigger_config: serde_json::json!({}),
            conditions: vec![],
            actions: vec![ActionStep::new(
                ActionType::AddNote,
                serde_json::json!({"body": "hi"}),
            )],
            webhook_secret: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn update_of_versioned_content_archives_a_snapshot() {
        let store = InMemoryRuleStore::new(clock());
        let rule = store.create(draft("Tag on create")).await.unwrap();
        assert_eq!(rule.version, 1);

        let updated = store
            .update(
                rule.id,
                RuleChanges {
                    actions: Some(vec![ActionStep::new(
                        ActionType::AddClientTag,
                        serde_json::json!({"tag": "new"}),
                    )]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let versions = store.versions(rule.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        // The snapshot preserves the original actions.
        assert_eq!(versions[0].actions[0].action_type, ActionType::AddNote);
    }

    #[tokio::test]
    async fn rename_alone_does_not_bump_the_version() {
        let store = InMemoryRuleStore::new(clock());
        let rule = store.create(draft("Old name")).await.unwrap();
        let updated = store
            .update(
                rule.id,
                RuleChanges {
                    name: Some("New name".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert!(store.versions(rule.id).await.unwrap().is_empty());
    }

    fn running_record() -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            subject_id: None,
            actor: None,
            payload: serde_json::json!({}),
            status: ExecutionStatus::Running,
            current_step: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            steps: vec![],
        }
    }

    #[tokio::test]
    async fn terminal_status_stamps_completion_from_the_injected_clock() {
        let clock = clock();
        let store = InMemoryExecutionStore::new(clock.clone());
        let record = running_record();
        let id = record.id;
        store.create(record).await.unwrap();

        clock.advance(chrono::Duration::minutes(5));
        store
            .set_status(id, ExecutionStatus::Completed, None)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.completed_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn step_log_append_is_idempotent_per_slot() {
        let store = InMemoryExecutionStore::new(clock());
        let record = running_record();
        let id = record.id;
        store.create(record).await.unwrap();

        let entry = |msg: &str| StepLogEntry {
            step_index: 0,
            parallel_index: None,
            action_type: ActionType::AddNote,
            status: crate::workflows::executor::StepStatus::Success,
            input: serde_json::json!({}),
            output: Some(serde_json::json!({"msg": msg})),
            error: None,
            executed_at: Utc::now(),
        };
        store.append_step_log(id, entry("first")).await.unwrap();
        store.append_step_log(id, entry("replayed")).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].output.as_ref().unwrap()["msg"], "replayed");
    }
}
