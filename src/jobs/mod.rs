//! Scheduled background sweeps.
//!
//! Sweeps produce the time-derived trigger events (time in stage, document
//! due/expired, task due/overdue, client inactivity) that no domain
//! mutation emits. They share the refire guard so a subject that already
//! fired a rule within the dedupe window is not fired again by the next
//! sweep pass.

pub mod document_sweep;
pub mod inactivity_sweep;
pub mod scheduler;
pub mod stage_sweep;
pub mod task_sweep;

pub use document_sweep::DocumentSweep;
pub use inactivity_sweep::InactivitySweep;
pub use scheduler::{JobConfig, JobError, JobResult, SweepScheduler};
pub use stage_sweep::StageSweep;
pub use task_sweep::TaskSweep;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::workflows::definition::Rule;
use crate::workflows::engine::AutomationEngine;
use crate::workflows::triggers::TriggerEvent;

/// Per-run tally for one sweep pass. One item's failure lands in `errors`
/// and never aborts the pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResult {
    pub scanned: usize,
    pub fired: usize,
    pub skipped_duplicates: usize,
    pub errors: Vec<String>,
}

impl SweepResult {
    pub fn merge(&mut self, other: SweepResult) {
        self.scanned += other.scanned;
        self.fired += other.fired;
        self.skipped_duplicates += other.skipped_duplicates;
        self.errors.extend(other.errors);
    }
}

/// In-process (rule, subject) dedupe so overlapping sweep passes do not
/// refire the same rule at the same subject within the window. A window of
/// zero disables deduplication.
pub struct RefireGuard {
    fired: Mutex<HashMap<(Uuid, Uuid), DateTime<Utc>>>,
    window: Duration,
}

impl RefireGuard {
    pub fn new(window_hours: i64) -> Self {
        Self {
            fired: Mutex::new(HashMap::new()),
            window: Duration::hours(window_hours),
        }
    }

    /// Registers the (rule, subject) pair if it has not fired within the
    /// window. Returns `false` on a duplicate.
    pub fn should_fire(&self, rule_id: Uuid, subject_id: Uuid, now: DateTime<Utc>) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
        fired.retain(|_, at| now - *at < self.window);
        match fired.get(&(rule_id, subject_id)) {
            Some(_) => false,
            None => {
                fired.insert((rule_id, subject_id), now);
                true
            }
        }
    }
}

/// Integer knob from a rule's trigger config, e.g. `threshold_days`.
pub(crate) fn config_days(rule: &Rule, key: &str, default: i64) -> i64 {
    rule.trigger_config
        .get(key)
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 0)
        .unwrap_or(default)
}

/// Fire one event at one rule, folding any failure into the result tally.
pub(crate) async fn fire_isolated(
    engine: &AutomationEngine,
    rule: &Rule,
    event: &TriggerEvent,
    result: &mut SweepResult,
) {
    match engine.fire_rule(rule.id, event).await {
        Ok(summary) if summary.success => result.fired += 1,
        Ok(summary) => {
            result.fired += 1;
            result
                .errors
                .push(format!("rule '{}': {}", rule.name, summary.message));
        }
        Err(err) => {
            warn!(rule = %rule.name, %err, "sweep fire failed");
            result.errors.push(format!("rule '{}': {err}", rule.name));
        }
    }
}
