// Rule definitions, validation, version snapshots, and export/import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::actions::{ActionStep, ActionType, BranchConfig, ParallelConfig};
use super::conditions::ConditionNode;
use super::triggers::TriggerType;
use crate::error::{EngineError, EngineResult};

/// A named automation rule: trigger + conditions + ordered actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub trigger_type: TriggerType,
    /// Free-form key/value interpreted by the rule's producer, e.g.
    /// threshold days or a stage filter for sweep-produced triggers.
    pub trigger_config: serde_json::Value,
    /// Implicit-AND list; empty means unconditionally matched.
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,
    pub actions: Vec<ActionStep>,
    /// Shared secret for webhook-triggered rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Monotonically increasing; bumped whenever actions, conditions or
    /// trigger config change.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input for creating a rule. Validated before a `Rule` ever exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,
    pub actions: Vec<ActionStep>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl RuleDraft {
    /// A rule with no action steps is invalid; flow-control configs must at
    /// least parse, and parallel groups may not nest flow control.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("rule name must not be empty".into()));
        }
        if self.actions.is_empty() {
            return Err(EngineError::Validation(
                "rule must have at least one action step".into(),
            ));
        }
        validate_steps(&self.actions, true)?;
        Ok(())
    }
}

fn validate_steps(steps: &[ActionStep], allow_flow_control: bool) -> EngineResult<()> {
    for step in steps {
        match step.action_type {
            ActionType::Branch => {
                if !allow_flow_control {
                    return Err(EngineError::Validation(
                        "flow-control steps are not allowed inside a parallel group".into(),
                    ));
                }
                let config: BranchConfig = serde_json::from_value(step.config.clone())
                    .map_err(|e| {
                        EngineError::Validation(format!("invalid branch config: {e}"))
                    })?;
                validate_steps(&config.on_true, true)?;
                validate_steps(&config.on_false, true)?;
            }
            ActionType::Parallel => {
                if !allow_flow_control {
                    return Err(EngineError::Validation(
                        "flow-control steps are not allowed inside a parallel group".into(),
                    ));
                }
                let config: ParallelConfig = serde_json::from_value(step.config.clone())
                    .map_err(|e| {
                        EngineError::Validation(format!("invalid parallel config: {e}"))
                    })?;
                if config.steps.is_empty() {
                    return Err(EngineError::Validation(
                        "parallel group must contain at least one step".into(),
                    ));
                }
                validate_steps(&config.steps, false)?;
            }
            ActionType::Wait if !allow_flow_control => {
                return Err(EngineError::Validation(
                    "flow-control steps are not allowed inside a parallel group".into(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Partial update to a rule. Changing actions, conditions, or trigger
/// config archives the prior contents as a version snapshot first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleChanges {
    pub name: Option<String>,
    pub trigger_config: Option<serde_json::Value>,
    pub conditions: Option<Vec<ConditionNode>>,
    pub actions: Option<Vec<ActionStep>>,
    pub is_active: Option<bool>,
}

impl RuleChanges {
    /// Whether this change set touches versioned content.
    pub fn touches_versioned_content(&self) -> bool {
        self.trigger_config.is_some() || self.conditions.is_some() || self.actions.is_some()
    }
}

/// Immutable snapshot of a rule's versioned content. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule_id: Uuid,
    pub version: u32,
    pub trigger_type: TriggerType,
    pub trigger_config: serde_json::Value,
    pub conditions: Vec<ConditionNode>,
    pub actions: Vec<ActionStep>,
    pub archived_at: DateTime<Utc>,
}

/// Self-describing export document for a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub name: String,
    pub trigger_type: TriggerType,
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub conditions: Vec<ConditionNode>,
    pub actions: Vec<ActionStep>,
}

/// Targeted overrides applied when cloning a rule document as a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateOverrides {
    pub name: Option<String>,
    pub trigger_config: Option<serde_json::Value>,
    pub conditions: Option<Vec<ConditionNode>>,
    /// Per-step config replacements, keyed by action index.
    #[serde(default)]
    pub action_configs: HashMap<usize, serde_json::Value>,
}

impl Rule {
    pub fn export(&self) -> RuleDocument {
        RuleDocument {
            name: self.name.clone(),
            trigger_type: self.trigger_type,
            trigger_config: self.trigger_config.clone(),
            conditions: self.conditions.clone(),
            actions: self.actions.clone(),
        }
    }

    pub fn snapshot(&self, archived_at: DateTime<Utc>) -> RuleVersion {
        RuleVersion {
            rule_id: self.id,
            version: self.version,
            trigger_type: self.trigger_type,
            trigger_config: self.trigger_config.clone(),
            conditions: self.conditions.clone(),
            actions: self.actions.clone(),
            archived_at,
        }
    }
}

impl RuleDocument {
    /// Turn an exported document back into a creatable draft. The draft is
    /// validated on create like any other.
    pub fn into_draft(self) -> RuleDraft {
        RuleDraft {
            name: self.name,
            trigger_type: self.trigger_type,
            trigger_config: self.trigger_config,
            conditions: self.conditions,
            actions: self.actions,
            webhook_secret: None,
            is_active: true,
        }
    }

    /// Clone this document as a template with targeted overrides.
    pub fn clone_as_template(&self, overrides: TemplateOverrides) -> EngineResult<RuleDraft> {
        let mut actions = self.actions.clone();
        for (index, config) in &overrides.action_configs {
            let step = actions.get_mut(*index).ok_or_else(|| {
                EngineError::Validation(format!(
                    "template override targets action index {index}, but the rule has {} actions",
                    self.actions.len()
                ))
            })?;
            step.config = config.clone();
        }

        Ok(RuleDraft {
            name: overrides
                .name
                .unwrap_or_else(|| format!("{} (copy)", self.name)),
            trigger_type: self.trigger_type,
            trigger_config: overrides
                .trigger_config
                .unwrap_or_else(|| self.trigger_config.clone()),
            conditions: overrides.conditions.unwrap_or_else(|| self.conditions.clone()),
            actions,
            webhook_secret: None,
            is_active: true,
        })
    }
}
