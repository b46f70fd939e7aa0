// Automation Engine - fans a trigger event out to every matching rule
//
// One rule's failure never prevents later rules from firing; each rule
// gets its own outcome slot in the returned list, ordered by rule
// creation time.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::executor::{RunSummary, WorkflowExecutor};
use super::triggers::TriggerEvent;
use crate::error::EngineResult;
use crate::store::RuleStore;

/// Per-rule result of a trigger dispatch. `error` is set when the run
/// could not even start (missing rule, store failure); a run that started
/// and failed is reported through `summary` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireOutcome {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

pub struct AutomationEngine {
    rules: Arc<dyn RuleStore>,
    executor: Arc<WorkflowExecutor>,
}

impl AutomationEngine {
    pub fn new(rules: Arc<dyn RuleStore>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { rules, executor }
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Dispatch an event to all active rules with a matching trigger type.
    /// An event with no matching rules is a successful no-op.
    pub async fn fire(&self, event: &TriggerEvent) -> EngineResult<Vec<FireOutcome>> {
        let rules = self.rules.active_for_trigger(event.trigger_type).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            trigger = ?event.trigger_type,
            event = %event.event_id,
            matching = rules.len(),
            "dispatching trigger event"
        );

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            let result = self
                .executor
                .execute(
                    rule.id,
                    event.subject_id,
                    event.actor.clone(),
                    event.payload.clone(),
                )
                .await;
            outcomes.push(match result {
                Ok(summary) => FireOutcome {
                    rule_id: rule.id,
                    rule_name: rule.name,
                    summary: Some(summary),
                    error: None,
                },
                Err(err) => {
                    error!(rule = %rule.name, %err, "rule failed to start");
                    FireOutcome {
                        rule_id: rule.id,
                        rule_name: rule.name,
                        summary: None,
                        error: Some(err.to_string()),
                    }
                }
            });
        }
        Ok(outcomes)
    }

    /// Run exactly one rule for an event. Used by the webhook gate after
    /// authentication, where the rule is already known, and by sweeps
    /// firing threshold triggers at a specific rule.
    pub async fn fire_rule(&self, rule_id: Uuid, event: &TriggerEvent) -> EngineResult<RunSummary> {
        self.executor
            .execute(
                rule_id,
                event.subject_id,
                event.actor.clone(),
                event.payload.clone(),
            )
            .await
    }
}
