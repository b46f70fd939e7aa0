// Task sweep: fires overdue rules for open tasks past their due date and
// due-soon rules for open tasks coming due.

use std::sync::Arc;
use tracing::info;

use super::{config_days, fire_isolated, RefireGuard, SweepResult};
use crate::clock::Clock;
use crate::store::{DomainStore, RuleStore};
use crate::workflows::engine::AutomationEngine;
use crate::workflows::triggers::{TriggerEvent, TriggerType};

const DEFAULT_DUE_SOON_DAYS: i64 = 3;

pub struct TaskSweep {
    rules: Arc<dyn RuleStore>,
    domain: Arc<dyn DomainStore>,
    engine: Arc<AutomationEngine>,
    refire: Arc<RefireGuard>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl TaskSweep {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        domain: Arc<dyn DomainStore>,
        engine: Arc<AutomationEngine>,
        refire: Arc<RefireGuard>,
        clock: Arc<dyn Clock>,
        page_size: usize,
    ) -> Self {
        Self {
            rules,
            domain,
            engine,
            refire,
            clock,
            page_size,
        }
    }

    pub async fn run(&self) -> SweepResult {
        let mut result = self.check_overdue().await;
        result.merge(self.check_due_soon().await);
        info!(
            scanned = result.scanned,
            fired = result.fired,
            skipped = result.skipped_duplicates,
            errors = result.errors.len(),
            "task sweep completed"
        );
        result
    }

    async fn check_overdue(&self) -> SweepResult {
        let mut result = SweepResult::default();
        let now = self.clock.now();

        let rules = match self.rules.active_for_trigger(TriggerType::TaskOverdue).await {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let tasks = match self.domain.open_tasks_due_before(now, self.page_size).await {
                Ok(tasks) => tasks,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': overdue scan failed: {err}", rule.name));
                    continue;
                }
            };

            for task in tasks {
                result.scanned += 1;
                let Some(due) = task.due_date else {
                    continue;
                };
                if !self.refire.should_fire(rule.id, task.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days_overdue = (now - due).num_days();
                let event = TriggerEvent::task_overdue(task.id, task.client_id, days_overdue);
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }
        result
    }

    async fn check_due_soon(&self) -> SweepResult {
        let mut result = SweepResult::default();
        let now = self.clock.now();

        let rules = match self.rules.active_for_trigger(TriggerType::TaskDue).await {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let days_before = config_days(&rule, "days_before", DEFAULT_DUE_SOON_DAYS);
            let horizon = now + chrono::Duration::days(days_before);

            let tasks = match self
                .domain
                .open_tasks_due_before(horizon, self.page_size)
                .await
            {
                Ok(tasks) => tasks,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': due-soon scan failed: {err}", rule.name));
                    continue;
                }
            };

            for task in tasks {
                result.scanned += 1;
                let Some(due) = task.due_date else {
                    continue;
                };
                // Past-due tasks belong to the overdue trigger.
                if due < now {
                    continue;
                }
                if !self.refire.should_fire(rule.id, task.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days_until_due = (due - now).num_days();
                let event = TriggerEvent::task_due(task.id, task.client_id, days_until_due);
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }
        result
    }
}
