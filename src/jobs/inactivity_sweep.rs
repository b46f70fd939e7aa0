// Inactivity sweep: fires rules for clients with no recorded activity
// inside a per-rule window.

use std::sync::Arc;
use tracing::info;

use super::{config_days, fire_isolated, RefireGuard, SweepResult};
use crate::clock::Clock;
use crate::store::{DomainStore, RuleStore};
use crate::workflows::engine::AutomationEngine;
use crate::workflows::triggers::{TriggerEvent, TriggerType};

const DEFAULT_INACTIVE_DAYS: i64 = 30;

pub struct InactivitySweep {
    rules: Arc<dyn RuleStore>,
    domain: Arc<dyn DomainStore>,
    engine: Arc<AutomationEngine>,
    refire: Arc<RefireGuard>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl InactivitySweep {
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
            .active_for_trigger(TriggerType::ClientInactivity)
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                result.errors.push(format!("rule lookup failed: {err}"));
                return result;
            }
        };

        for rule in rules {
            let days_inactive = config_days(&rule, "days_inactive", DEFAULT_INACTIVE_DAYS);
            let cutoff = now - chrono::Duration::days(days_inactive);

            let clients = match self
                .domain
                .clients_inactive_since(cutoff, self.page_size)
                .await
            {
                Ok(clients) => clients,
                Err(err) => {
                    result
                        .errors
                        .push(format!("rule '{}': inactivity scan failed: {err}", rule.name));
                    continue;
                }
            };

            for client in clients {
                result.scanned += 1;
                let Some(last_activity) = client.last_activity_at else {
                    continue;
                };
                if !self.refire.should_fire(rule.id, client.id, now) {
                    result.skipped_duplicates += 1;
                    continue;
                }

                let days = (now - last_activity).num_days();
                let event = TriggerEvent::client_inactivity(client.id, days);
                fire_isolated(&self.engine, &rule, &event, &mut result).await;
            }
        }

        info!(
            scanned = result.scanned,
            fired = result.fired,
            skipped = result.skipped_duplicates,
            errors = result.errors.len(),
            "inactivity sweep completed"
        );
        result
    }
}
