// Document sweep: fires due-date-approaching rules for documents coming
// due, and expiry rules for documents already past their expiry date.

use std::sync::Arc;
use tracing::info;

use super::{config_days, fire_isolated, RefireGuard, SweepResult};
use crate::clock::Clock;
use crate::store::{DomainStore, RuleStore};
use crate::workflows::engine::AutomationEngine;
use crate::workflows::triggers::{TriggerEvent, TriggerType};

const DEFAULT_DUE_SOON_DAYS: i64 = 7;

pub struct DocumentSweep {
    rules: Arc<dyn RuleStore>,
    domain: Arc<dyn DomainStore>,
    engine: Arc<AutomationEngine>,
    refire: Arc<RefireGuard>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl DocumentSweep {
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
        let mut result = self.check_due_dates().await;
        result.merge(self.check_expirations().await);
        info!(
            scanned = result.scanned,
            fired = result.fired,
            skipped = result.skipped_duplicates,
            errors = result.errors.len(),
            "document sweep completed"
        );
        result
    }

    async fn check_due_dates(&self) -> SweepResult {
        let mut result = SweepResult::default();
        let now = self.clock.now();

        let rules = match self
            .rules
            .active_for_trigger(TriggerType::DocumentDueDate)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let days_before = config_days(&rule, "days_before", DEFAULT_DUE_SOON_DAYS);
            let horizon = now + chrono::Duration::days(days_before);

            let documents = match self.domain.documents_due_before(horizon, self.page_size).await {
                Ok(documents) => documents,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': due-date scan failed: {err}", rule.name));
                    continue;
                }
            };

            for document in documents {
                result.scanned += 1;
                let Some(due) = document.due_date else {
                    continue;
                };
                // Already-overdue documents are the expiry/task sweeps'
                // concern; this trigger is "approaching".
                if due < now {
                    continue;
                }
                if !self.refire.should_fire(rule.id, document.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days_until_due = (due - now).num_days();
                let event =
                    TriggerEvent::document_due(document.id, document.client_id, days_until_due);
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }
        result
    }

    async fn check_expirations(&self) -> SweepResult {
        let mut result = SweepResult::default();
        let now = self.clock.now();

        let rules = match self
            .rules
            .active_for_trigger(TriggerType::DocumentExpired)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let documents = match self
                .domain
                .documents_expired_before(now, self.page_size)
                .await
            {
                Ok(documents) => documents,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': expiry scan failed: {err}", rule.name));
                    continue;
                }
            };

            for document in documents {
                result.scanned += 1;
                let Some(expires) = document.expires_at else {
                    continue;
                };
                if !self.refire.should_fire(rule.id, document.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days_since_expiry = (now - expires).num_days();
                let event = TriggerEvent::document_expired(
                    document.id,
                    document.client_id,
                    days_since_expiry,
                );
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }
        result
    }
}
