//! clientflow-engine: workflow automation for a business CRM.
//!
//! Rules pair a trigger with a condition tree and an ordered action list.
//! Domain events and scheduled sweeps fire triggers; the engine evaluates
//! conditions against a snapshot of the client's records and steps through
//! the actions, persisting an auditable execution log as it goes. Inbound
//! webhooks pass an HMAC/freshness/replay gate before they reach a rule.
//!
//! Persistence and the HTTP surface are external collaborators: the engine
//! is written against the traits in [`store`], with in-memory
//! implementations for tests and embedded use.

pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod store;
pub mod webhooks;
pub mod workflows;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{AuthFailure, EngineError, EngineResult};
pub use metrics::{GateMetrics, GateMetricsSnapshot};
pub use webhooks::{WebhookAck, WebhookDelivery, WebhookGate};
pub use workflows::{
    AutomationEngine, ConditionNode, ExecutionStatus, Predicate, Rule, RuleDraft, RunStatus,
    RunSummary, TriggerEvent, TriggerType, WorkflowExecutor,
};
