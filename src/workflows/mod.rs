//! The workflow automation core: triggers, conditions, actions, and the
//! executor that ties them together.

pub mod actions;
pub mod conditions;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod triggers;

pub use actions::{ActionOutcome, ActionStep, ActionType};
pub use conditions::{evaluate_tree, ConditionNode, Predicate, SubjectContext};
pub use definition::{Rule, RuleChanges, RuleDraft};
pub use dispatcher::{ActionContext, ActionDispatcher, ActionHandler};
pub use engine::{AutomationEngine, FireOutcome};
pub use executor::{ExecutionRecord, ExecutionStatus, RunStatus, RunSummary, WorkflowExecutor};
pub use triggers::{TriggerEvent, TriggerType};
