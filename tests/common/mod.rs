//! Shared harness for integration tests: in-memory stores, a manual
//! clock, and a recording action handler wired into a full engine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use clientflow_engine::clock::ManualClock;
use clientflow_engine::models::Client;
use clientflow_engine::store::memory::{
    InMemoryDomainStore, InMemoryExecutionStore, InMemoryRuleStore,
};
use clientflow_engine::workflows::actions::{ActionCategory, ActionOutcome, ActionType};
use clientflow_engine::workflows::dispatcher::{ActionContext, ActionDispatcher, ActionHandler};
use clientflow_engine::workflows::{AutomationEngine, WorkflowExecutor};
use clientflow_engine::EngineResult;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub action_type: ActionType,
    pub config: Value,
}

/// Records every dispatched call; action types in `fail_types` return a
/// failed outcome instead of succeeding.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<RecordedCall>>,
    fail_types: Mutex<HashSet<ActionType>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn fail_on(&self, action_type: ActionType) {
        self.fail_types.lock().unwrap().insert(action_type);
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn execute(
        &self,
        action_type: ActionType,
        config: &Value,
        _ctx: &ActionContext,
    ) -> EngineResult<ActionOutcome> {
        self.calls.lock().unwrap().push(RecordedCall {
            action_type,
            config: config.clone(),
        });
        if self.fail_types.lock().unwrap().contains(&action_type) {
            Ok(ActionOutcome::failure(format!("{action_type:?} rigged to fail")))
        } else {
            Ok(ActionOutcome::success(format!("{action_type:?} done"), None))
        }
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub domain: Arc<InMemoryDomainStore>,
    pub rules: Arc<InMemoryRuleStore>,
    pub executions: Arc<InMemoryExecutionStore>,
    pub recorder: Arc<RecordingHandler>,
    pub executor: Arc<WorkflowExecutor>,
    pub engine: Arc<AutomationEngine>,
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
    ));
    let domain = Arc::new(InMemoryDomainStore::new());
    let rules = Arc::new(InMemoryRuleStore::new(clock.clone()));
    let executions = Arc::new(InMemoryExecutionStore::new(clock.clone()));
    let recorder = Arc::new(RecordingHandler::default());

    let mut dispatcher = ActionDispatcher::new();
    for category in [
        ActionCategory::Document,
        ActionCategory::Communication,
        ActionCategory::Task,
        ActionCategory::Client,
        ActionCategory::Note,
        ActionCategory::Notification,
        ActionCategory::Webhook,
    ] {
        dispatcher.register(category, recorder.clone());
    }

    let executor = Arc::new(WorkflowExecutor::new(
        rules.clone(),
        executions.clone(),
        domain.clone(),
        Arc::new(dispatcher),
        clock.clone(),
    ));
    let engine = Arc::new(AutomationEngine::new(rules.clone(), executor.clone()));

    Harness {
        clock,
        domain,
        rules,
        executions,
        recorder,
        executor,
        engine,
    }
}

pub fn client(status: &str) -> Client {
    Client {
        id: Uuid::new_v4(),
        name: "Acme Holdings".into(),
        status: status.into(),
        stage: Some("onboarding".into()),
        stage_entered_at: None,
        last_activity_at: None,
        tags: vec![],
        created_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    }
}
