// Time-in-stage sweep: fires rules for clients that have sat in a
// pipeline stage past a per-rule threshold.

use std::sync::Arc;
use tracing::info;

use super::{config_days, fire_isolated, RefireGuard, SweepResult};
use crate::clock::Clock;
use crate::store::{DomainStore, RuleStore};
use crate::workflows::engine::AutomationEngine;
use crate::workflows::triggers::{TriggerEvent, TriggerType};

const DEFAULT_THRESHOLD_DAYS: i64 = 7;

pub struct StageSweep {
    rules: Arc<dyn RuleStore>,
    domain: Arc<dyn DomainStore>,
    engine: Arc<AutomationEngine>,
    refire: Arc<RefireGuard>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl StageSweep {
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
        let mut result = SweepResult::default();
        let now = self.clock.now();

        let rules = match self
            .rules
            .active_for_trigger(TriggerType::TimeInStageThreshold)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let threshold = config_days(&rule, "threshold_days", DEFAULT_THRESHOLD_DAYS);
            let stage_filter = rule
                .trigger_config
                .get("stage")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            let cutoff = now - chrono::Duration::days(threshold);

            let clients = match self
                .domain
                .clients_in_stage_since(cutoff, self.page_size)
                .await
            {
                Ok(clients) => clients,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': stage scan failed: {err}", rule.name));
                    continue;
                }
            };

            for client in clients {
                result.scanned += 1;
                let Some(stage) = client.stage.as_deref() else {
                    continue;
                };
                if let Some(filter) = &stage_filter {
                    if filter != stage {
                        continue;
                    }
                }
                let Some(entered_at) = client.stage_entered_at else {
                    continue;
                };
                if !self.refire.should_fire(rule.id, client.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days_in_stage = (now - entered_at).num_days();
                let event = TriggerEvent::time_in_stage(client.id, stage, days_in_stage);
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }

        info!(
            scanned = result.scanned,
            fired = result.fired,
            skipped = result.skipped_duplicates,
            errors = result.errors.len(),
            "stage sweep completed"
        );
        result
    }
}
