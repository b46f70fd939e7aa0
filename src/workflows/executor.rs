// Workflow Executor - steps through a rule's action list end-to-end
//
// One logical thread of control per execution. Every step persists its
// index before dispatch (crash-recovery checkpoint) and its log entry
// immediately after, so a crash mid-run leaves a truthful partial log.
// Cancellation is cooperative: live status is re-read between steps.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{ActionOutcome, ActionStep, ActionType, BranchConfig, ParallelConfig, WaitConfig};
use super::conditions::{evaluate_tree, Evaluation, SubjectContext};
use super::dispatcher::{ActionContext, ActionDispatcher};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::models::Actor;
use crate::store::{DomainStore, ExecutionStore, RuleStore};

/// Durable status of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome of a single logged step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// One entry in an execution's step log. Input and output snapshots are
/// opaque serialized blobs from the caller's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub step_index: usize,
    /// Set for members of a parallel group; doubles as the idempotency
    /// sub-key within a step.
    pub parallel_index: Option<usize>,
    pub action_type: ActionType,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Durable record of one rule run. The originating event's actor and
/// payload are persisted so a resumed run renders templates and
/// evaluates branches against the same inputs as the original pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub actor: Option<Actor>,
    pub payload: Value,
    pub status: ExecutionStatus,
    pub current_step: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub steps: Vec<StepLogEntry>,
}

impl ExecutionRecord {
    fn new(
        rule_id: Uuid,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id,
            subject_id,
            actor,
            payload,
            status: ExecutionStatus::Running,
            current_step: 0,
            started_at,
            completed_at: None,
            error: None,
            steps: Vec::new(),
        }
    }
}

/// Caller-facing status of a run request. `Skipped` is returned when
/// conditions did not match; no execution record exists in that case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Skipped,
    Paused,
    Cancelled,
}

/// Structured result returned to manual/API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub execution_id: Option<Uuid>,
    pub status: RunStatus,
    pub success: bool,
    pub message: String,
}

impl RunSummary {
    fn new(execution_id: Option<Uuid>, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            execution_id,
            status,
            success: !matches!(status, RunStatus::Failed),
            message: message.into(),
        }
    }
}

/// Explicit growable step sequence. Branching splices fragments in place,
/// so iteration re-reads the length every pass instead of using an
/// iterator over the original list.
#[derive(Debug)]
pub(crate) struct StepQueue {
    steps: Vec<ActionStep>,
    index: usize,
}

impl StepQueue {
    pub(crate) fn new(steps: Vec<ActionStep>, start_index: usize) -> Self {
        Self {
            steps,
            index: start_index,
        }
    }

    pub(crate) fn current(&self) -> Option<&ActionStep> {
        self.steps.get(self.index)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Insert a fragment immediately after the current step, before any
    /// step that followed it in the original list.
    pub(crate) fn splice_after_current(&mut self, fragment: Vec<ActionStep>) {
        let at = (self.index + 1).min(self.steps.len());
        self.steps.splice(at..at, fragment);
    }

    pub(crate) fn advance(&mut self) {
        self.index += 1;
    }
}

/// Per-step entry in a dry-run plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub index: usize,
    pub action_type: ActionType,
    pub description: String,
    pub estimated_ms: u64,
}

/// Structural preview of what a rule would do, built without invoking any
/// handler. Shares the condition evaluation path with real execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub rule_active: bool,
    pub conditions_matched: bool,
    pub condition_diagnostic: String,
    pub would_run: bool,
    pub steps: Vec<PlannedStep>,
    pub estimated_total_ms: u64,
}

pub struct WorkflowExecutor {
    rules: Arc<dyn RuleStore>,
    executions: Arc<dyn ExecutionStore>,
    domain: Arc<dyn DomainStore>,
    dispatcher: Arc<ActionDispatcher>,
    clock: Arc<dyn Clock>,
}

impl WorkflowExecutor {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        executions: Arc<dyn ExecutionStore>,
        domain: Arc<dyn DomainStore>,
        dispatcher: Arc<ActionDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            executions,
            domain,
            dispatcher,
            clock,
        }
    }

    /// Run a rule synchronously. `Wait` steps are advisory (logged, no
    /// suspension).
    pub async fn execute(
        &self,
        rule_id: Uuid,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: Value,
    ) -> EngineResult<RunSummary> {
        self.start(rule_id, subject_id, actor, payload, false).await
    }

    /// Run a rule with resumable semantics: a `Wait` step transitions the
    /// execution to `Paused` and returns; `resume` continues it later.
    pub async fn execute_resumable(
        &self,
        rule_id: Uuid,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: Value,
    ) -> EngineResult<RunSummary> {
        self.start(rule_id, subject_id, actor, payload, true).await
    }

    async fn start(
        &self,
        rule_id: Uuid,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: Value,
        pause_on_wait: bool,
    ) -> EngineResult<RunSummary> {
        let rule = self
            .rules
            .get(rule_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id}")))?;
        if !rule.is_active {
            return Err(EngineError::Inactive(format!(
                "rule '{}' is disabled",
                rule.name
            )));
        }

        let subject_ctx = SubjectContext::load(
            self.domain.as_ref(),
            subject_id,
            actor.clone(),
            payload.clone(),
            self.clock.as_ref(),
        )
        .await?;

        // Conditions gate the run only when there is a subject to evaluate
        // them against. A non-match is not an error and not a record.
        if !rule.conditions.is_empty() && subject_id.is_some() {
            let eval = evaluate_tree(&rule.conditions, &subject_ctx);
            if !eval.matched {
                return Ok(RunSummary::new(None, RunStatus::Skipped, eval.diagnostic));
            }
        }

        let record = ExecutionRecord::new(
            rule.id,
            subject_id,
            actor.clone(),
            payload.clone(),
            self.clock.now(),
        );
        let execution_id = record.id;
        self.executions.create(record).await?;

        info!(rule = %rule.name, %execution_id, "execution started");

        let action_ctx = ActionContext {
            execution_id,
            rule_id: rule.id,
            subject_id,
            actor,
            payload,
        };
        let queue = StepQueue::new(rule.actions.clone(), 0);
        self.run_loop(execution_id, queue, &subject_ctx, &action_ctx, pause_on_wait)
            .await
    }

    /// Re-enter a paused (or still running) execution at its persisted
    /// step index.
    pub async fn resume(&self, execution_id: Uuid) -> EngineResult<RunSummary> {
        let record = self
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;

        match record.status {
            ExecutionStatus::Paused | ExecutionStatus::Running | ExecutionStatus::Pending => {}
            other => {
                return Err(EngineError::Validation(format!(
                    "cannot resume execution in {other:?} state"
                )))
            }
        }

        let rule = self
            .rules
            .get(record.rule_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("rule {}", record.rule_id)))?;

        self.executions
            .set_status(execution_id, ExecutionStatus::Running, None)
            .await?;

        let subject_ctx = SubjectContext::load(
            self.domain.as_ref(),
            record.subject_id,
            record.actor.clone(),
            record.payload.clone(),
            self.clock.as_ref(),
        )
        .await?;
        let action_ctx = ActionContext {
            execution_id,
            rule_id: rule.id,
            subject_id: record.subject_id,
            actor: record.actor.clone(),
            payload: record.payload.clone(),
        };
        let queue = StepQueue::new(rule.actions.clone(), record.current_step);
        self.run_loop(execution_id, queue, &subject_ctx, &action_ctx, true)
            .await
    }

    /// Request a pause; takes effect before the next step executes.
    pub async fn pause(&self, execution_id: Uuid) -> EngineResult<()> {
        let status = self
            .executions
            .status(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        match status {
            ExecutionStatus::Running | ExecutionStatus::Pending => {
                self.executions
                    .set_status(execution_id, ExecutionStatus::Paused, None)
                    .await
            }
            other => Err(EngineError::Validation(format!(
                "cannot pause execution in {other:?} state"
            ))),
        }
    }

    /// Cancel a run. Allowed from running, pending, or paused; cancelling
    /// a terminal execution is an error.
    pub async fn cancel(&self, execution_id: Uuid) -> EngineResult<()> {
        let status = self
            .executions
            .status(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        match status {
            ExecutionStatus::Running | ExecutionStatus::Pending | ExecutionStatus::Paused => {
                self.executions
                    .set_status(execution_id, ExecutionStatus::Cancelled, None)
                    .await
            }
            other => Err(EngineError::Validation(format!(
                "cannot cancel execution in terminal {other:?} state"
            ))),
        }
    }

    /// Preview what a rule would do for a subject without executing
    /// anything. Uses the same condition evaluation path as a real run.
    pub async fn dry_run(
        &self,
        rule_id: Uuid,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: Value,
    ) -> EngineResult<ExecutionPlan> {
        let rule = self
            .rules
            .get(rule_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id}")))?;

        let subject_ctx = SubjectContext::load(
            self.domain.as_ref(),
            subject_id,
            actor,
            payload,
            self.clock.as_ref(),
        )
        .await?;
        let eval = if !rule.conditions.is_empty() && subject_id.is_some() {
            evaluate_tree(&rule.conditions, &subject_ctx)
        } else {
            Evaluation {
                matched: true,
                success: true,
                diagnostic: "no conditions; unconditionally matched".into(),
            }
        };

        let steps: Vec<PlannedStep> = rule
            .actions
            .iter()
            .enumerate()
            .map(|(index, step)| PlannedStep {
                index,
                action_type: step.action_type,
                description: describe_step(step),
                estimated_ms: step.action_type.estimated_duration_ms(),
            })
            .collect();
        let estimated_total_ms = steps.iter().map(|s| s.estimated_ms).sum();

        Ok(ExecutionPlan {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            rule_active: rule.is_active,
            conditions_matched: eval.matched,
            condition_diagnostic: eval.diagnostic,
            would_run: rule.is_active && eval.matched,
            steps,
            estimated_total_ms,
        })
    }

    async fn run_loop(
        &self,
        execution_id: Uuid,
        mut queue: StepQueue,
        subject_ctx: &SubjectContext,
        action_ctx: &ActionContext,
        pause_on_wait: bool,
    ) -> EngineResult<RunSummary> {
        while let Some(step) = queue.current().cloned() {
            let index = queue.index();

            // An external cancel or pause takes effect between steps, not
            // just at the start of the run.
            let live = self
                .executions
                .status(execution_id)
                .await?
                .ok_or_else(|| EngineError::Store(format!("execution {execution_id} vanished")))?;
            match live {
                ExecutionStatus::Cancelled => {
                    return Ok(RunSummary::new(
                        Some(execution_id),
                        RunStatus::Cancelled,
                        "execution cancelled",
                    ));
                }
                ExecutionStatus::Paused => {
                    return Ok(RunSummary::new(
                        Some(execution_id),
                        RunStatus::Paused,
                        "execution paused",
                    ));
                }
                _ => {}
            }

            self.executions
                .set_current_step(execution_id, index)
                .await?;
            let config = render_templates(&step.config, &action_ctx.payload);

            match step.action_type {
                ActionType::Wait => {
                    let note = serde_json::from_value::<WaitConfig>(config.clone())
                        .unwrap_or_default()
                        .note
                        .unwrap_or_else(|| "wait".into());
                    self.log_step(
                        execution_id,
                        index,
                        None,
                        step.action_type,
                        &config,
                        &ActionOutcome::success(&note, None),
                    )
                    .await?;

                    if pause_on_wait {
                        // Resume continues after the wait step.
                        self.executions
                            .set_current_step(execution_id, index + 1)
                            .await?;
                        self.executions
                            .set_status(execution_id, ExecutionStatus::Paused, None)
                            .await?;
                        return Ok(RunSummary::new(
                            Some(execution_id),
                            RunStatus::Paused,
                            format!("paused at wait step {index}"),
                        ));
                    }
                }

                ActionType::Branch => {
                    match serde_json::from_value::<BranchConfig>(config.clone()) {
                        Ok(branch) => {
                            let eval = evaluate_tree(&branch.condition, subject_ctx);
                            let (taken, fragment) = if eval.matched {
                                ("true", branch.on_true)
                            } else {
                                ("false", branch.on_false)
                            };
                            let outcome = ActionOutcome::success(
                                format!("took {taken} branch ({} steps)", fragment.len()),
                                Some(serde_json::json!({
                                    "branch": taken,
                                    "diagnostic": eval.diagnostic,
                                })),
                            );
                            self.log_step(
                                execution_id,
                                index,
                                None,
                                step.action_type,
                                &config,
                                &outcome,
                            )
                            .await?;
                            queue.splice_after_current(fragment);
                        }
                        Err(err) => {
                            let outcome =
                                ActionOutcome::failure(format!("invalid branch config: {err}"));
                            self.log_step(
                                execution_id,
                                index,
                                None,
                                step.action_type,
                                &config,
                                &outcome,
                            )
                            .await?;
                            if !step.continue_on_error {
                                return self.fail(execution_id, index, outcome.message).await;
                            }
                        }
                    }
                }

                ActionType::Parallel => {
                    match serde_json::from_value::<ParallelConfig>(config.clone()) {
                        Ok(parallel) => {
                            // Children run sequentially against the same
                            // context; individual failures never abort the
                            // parent run.
                            for (child_index, child) in parallel.steps.iter().enumerate() {
                                let child_config =
                                    render_templates(&child.config, &action_ctx.payload);
                                let outcome = self
                                    .dispatcher
                                    .dispatch(child.action_type, &child_config, action_ctx)
                                    .await;
                                if !outcome.success {
                                    warn!(
                                        %execution_id,
                                        step = index,
                                        child = child_index,
                                        "parallel child failed: {}",
                                        outcome.message
                                    );
                                }
                                self.log_step(
                                    execution_id,
                                    index,
                                    Some(child_index),
                                    child.action_type,
                                    &child_config,
                                    &outcome,
                                )
                                .await?;
                            }
                        }
                        Err(err) => {
                            let outcome =
                                ActionOutcome::failure(format!("invalid parallel config: {err}"));
                            self.log_step(
                                execution_id,
                                index,
                                None,
                                step.action_type,
                                &config,
                                &outcome,
                            )
                            .await?;
                            if !step.continue_on_error {
                                return self.fail(execution_id, index, outcome.message).await;
                            }
                        }
                    }
                }

                _ => {
                    let outcome = self
                        .dispatcher
                        .dispatch(step.action_type, &config, action_ctx)
                        .await;
                    self.log_step(
                        execution_id,
                        index,
                        None,
                        step.action_type,
                        &config,
                        &outcome,
                    )
                    .await?;
                    if !outcome.success && !step.continue_on_error {
                        return self.fail(execution_id, index, outcome.message).await;
                    }
                }
            }

            queue.advance();
        }

        self.executions
            .set_status(execution_id, ExecutionStatus::Completed, None)
            .await?;
        Ok(RunSummary::new(
            Some(execution_id),
            RunStatus::Completed,
            "all steps completed",
        ))
    }

    async fn fail(
        &self,
        execution_id: Uuid,
        index: usize,
        message: String,
    ) -> EngineResult<RunSummary> {
        warn!(%execution_id, step = index, "execution failed: {message}");
        self.executions
            .set_status(execution_id, ExecutionStatus::Failed, Some(message.clone()))
            .await?;
        Ok(RunSummary::new(
            Some(execution_id),
            RunStatus::Failed,
            format!("step {index} failed: {message}"),
        ))
    }

    async fn log_step(
        &self,
        execution_id: Uuid,
        step_index: usize,
        parallel_index: Option<usize>,
        action_type: ActionType,
        input: &Value,
        outcome: &ActionOutcome,
    ) -> EngineResult<()> {
        let entry = StepLogEntry {
            step_index,
            parallel_index,
            action_type,
            status: if outcome.success {
                StepStatus::Success
            } else {
                StepStatus::Failed
            },
            input: input.clone(),
            output: outcome.data.clone(),
            error: if outcome.success {
                None
            } else {
                Some(outcome.message.clone())
            },
            executed_at: self.clock.now(),
        };
        self.executions.append_step_log(execution_id, entry).await
    }
}

fn describe_step(step: &ActionStep) -> String {
    match step.action_type {
        ActionType::Branch => {
            match serde_json::from_value::<BranchConfig>(step.config.clone()) {
                Ok(cfg) => format!(
                    "Branch on a condition ({} steps if matched, {} otherwise)",
                    cfg.on_true.len(),
                    cfg.on_false.len()
                ),
                Err(_) => "Branch on a condition (invalid config)".into(),
            }
        }
        ActionType::Parallel => {
            match serde_json::from_value::<ParallelConfig>(step.config.clone()) {
                Ok(cfg) => format!(
                    "Run {} actions as an independent batch",
                    cfg.steps.len()
                ),
                Err(_) => "Run a group of actions (invalid config)".into(),
            }
        }
        other => other.describe().to_string(),
    }
}

/// Replace `{{path.to.field}}` patterns in action configs with values from
/// the event payload.
pub(crate) fn render_templates(config: &Value, payload: &Value) -> Value {
    match config {
        Value::String(s) => Value::String(replace_template_vars(s, payload)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_templates(v, payload)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_templates(v, payload)).collect())
        }
        _ => config.clone(),
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

fn replace_template_vars(template: &str, payload: &Value) -> String {
    let mut result = template.to_string();
    for cap in template_regex().captures_iter(template) {
        let path = cap[1].trim();
        if let Some(value) = get_nested_value(payload, path) {
            let replacement = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            result = result.replace(&cap[0], &replacement);
        }
    }
    result
}

fn get_nested_value(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}
