// Workflow Actions - the closed action vocabulary and its category table
//
// The tag -> category classification lives in exactly one place
// (`ActionType::category`) and is consulted by both the executor and the
// dry-run planner. Adding an action type means one enum variant, one
// category row, and one schema row - handlers are registered per category.

use serde::{Deserialize, Serialize};

use super::conditions::ConditionNode;

/// Types of actions a rule can execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    // Document actions
    GenerateDocument,
    RequestDocument,
    ArchiveDocument,

    // Communication actions
    SendEmail,
    SendSms,
    SendTemplateMessage,

    // Task actions
    CreateTask,
    CompleteTask,
    ReassignTask,

    // Client actions
    UpdateClientField,
    ChangeClientStage,
    AddClientTag,
    RemoveClientTag,

    // Note actions
    AddNote,

    // Notification actions
    NotifyUser,
    NotifyTeam,

    // Flow control (interpreted by the executor, never dispatched)
    Wait,
    Branch,
    Parallel,

    // Outbound webhook
    CallWebhook,
}

/// The eight handler categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Document,
    Communication,
    Task,
    Client,
    Note,
    Notification,
    FlowControl,
    Webhook,
}

impl ActionType {
    /// Single source of truth for tag -> category classification.
    pub fn category(self) -> ActionCategory {
        match self {
            Self::GenerateDocument | Self::RequestDocument | Self::ArchiveDocument => {
                ActionCategory::Document
            }
            Self::SendEmail | Self::SendSms | Self::SendTemplateMessage => {
                ActionCategory::Communication
            }
            Self::CreateTask | Self::CompleteTask | Self::ReassignTask => ActionCategory::Task,
            Self::UpdateClientField
            | Self::ChangeClientStage
            | Self::AddClientTag
            | Self::RemoveClientTag => ActionCategory::Client,
            Self::AddNote => ActionCategory::Note,
            Self::NotifyUser | Self::NotifyTeam => ActionCategory::Notification,
            Self::Wait | Self::Branch | Self::Parallel => ActionCategory::FlowControl,
            Self::CallWebhook => ActionCategory::Webhook,
        }
    }

    pub fn is_flow_control(self) -> bool {
        self.category() == ActionCategory::FlowControl
    }

    /// Human-readable description used by the dry-run planner.
    pub fn describe(self) -> &'static str {
        match self {
            Self::GenerateDocument => "Generate a document from a template",
            Self::RequestDocument => "Request a document upload from the client",
            Self::ArchiveDocument => "Archive a document",
            Self::SendEmail => "Send an email",
            Self::SendSms => "Send an SMS message",
            Self::SendTemplateMessage => "Send a message from a communications template",
            Self::CreateTask => "Create a task",
            Self::CompleteTask => "Mark a task completed",
            Self::ReassignTask => "Reassign a task",
            Self::UpdateClientField => "Update a field on the client record",
            Self::ChangeClientStage => "Move the client to another pipeline stage",
            Self::AddClientTag => "Add a tag to the client",
            Self::RemoveClientTag => "Remove a tag from the client",
            Self::AddNote => "Add a note to the client record",
            Self::NotifyUser => "Notify a user in-app",
            Self::NotifyTeam => "Notify a team channel",
            Self::Wait => "Wait for an external resume",
            Self::Branch => "Branch on a condition",
            Self::Parallel => "Run a group of actions as an independent batch",
            Self::CallWebhook => "Call an external webhook URL",
        }
    }

    /// Rough per-step duration estimate for dry-run plans, in ms.
    pub fn estimated_duration_ms(self) -> u64 {
        match self.category() {
            ActionCategory::Communication | ActionCategory::Webhook => 500,
            ActionCategory::Document => 1_000,
            ActionCategory::FlowControl => 0,
            _ => 100,
        }
    }

    /// Declarative configuration schema for UI generation. Descriptive
    /// only; the executor does not enforce it.
    pub fn schema(self) -> &'static [FieldSchema] {
        match self {
            Self::GenerateDocument => GENERATE_DOCUMENT_SCHEMA,
            Self::RequestDocument => REQUEST_DOCUMENT_SCHEMA,
            Self::ArchiveDocument => ARCHIVE_DOCUMENT_SCHEMA,
            Self::SendEmail => SEND_EMAIL_SCHEMA,
            Self::SendSms => SEND_SMS_SCHEMA,
            Self::SendTemplateMessage => SEND_TEMPLATE_MESSAGE_SCHEMA,
            Self::CreateTask => CREATE_TASK_SCHEMA,
            Self::CompleteTask => COMPLETE_TASK_SCHEMA,
            Self::ReassignTask => REASSIGN_TASK_SCHEMA,
            Self::UpdateClientField => UPDATE_CLIENT_FIELD_SCHEMA,
            Self::ChangeClientStage => CHANGE_CLIENT_STAGE_SCHEMA,
            Self::AddClientTag | Self::RemoveClientTag => CLIENT_TAG_SCHEMA,
            Self::AddNote => ADD_NOTE_SCHEMA,
            Self::NotifyUser => NOTIFY_USER_SCHEMA,
            Self::NotifyTeam => NOTIFY_TEAM_SCHEMA,
            Self::Wait => WAIT_SCHEMA,
            Self::Branch => BRANCH_SCHEMA,
            Self::Parallel => PARALLEL_SCHEMA,
            Self::CallWebhook => CALL_WEBHOOK_SCHEMA,
        }
    }
}

const GENERATE_DOCUMENT_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("template_id", FieldType::String),
    FieldSchema::optional("name", FieldType::String, None),
];
const REQUEST_DOCUMENT_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("document_name", FieldType::String),
    FieldSchema::optional("due_in_days", FieldType::Number, Some("7")),
];
const ARCHIVE_DOCUMENT_SCHEMA: &[FieldSchema] =
    &[FieldSchema::required("document_id", FieldType::String)];
const SEND_EMAIL_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("to", FieldType::String),
    FieldSchema::required("subject", FieldType::String),
    FieldSchema::required("body", FieldType::String),
];
const SEND_SMS_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("to", FieldType::String),
    FieldSchema::required("message", FieldType::String),
];
const SEND_TEMPLATE_MESSAGE_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("template_id", FieldType::String),
    FieldSchema::optional("variables", FieldType::Object, None),
];
const CREATE_TASK_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("title", FieldType::String),
    FieldSchema::optional("assignee_id", FieldType::String, None),
    FieldSchema::optional("due_in_days", FieldType::Number, Some("3")),
];
const COMPLETE_TASK_SCHEMA: &[FieldSchema] =
    &[FieldSchema::required("task_id", FieldType::String)];
const REASSIGN_TASK_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("task_id", FieldType::String),
    FieldSchema::required("assignee_id", FieldType::String),
];
const UPDATE_CLIENT_FIELD_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("field", FieldType::String),
    FieldSchema::required("value", FieldType::String),
];
const CHANGE_CLIENT_STAGE_SCHEMA: &[FieldSchema] =
    &[FieldSchema::required("stage", FieldType::String)];
const CLIENT_TAG_SCHEMA: &[FieldSchema] = &[FieldSchema::required("tag", FieldType::String)];
const ADD_NOTE_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("body", FieldType::String),
    FieldSchema::optional("pinned", FieldType::Boolean, Some("false")),
];
const NOTIFY_USER_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("user_id", FieldType::String),
    FieldSchema::required("message", FieldType::String),
];
const NOTIFY_TEAM_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("team", FieldType::String),
    FieldSchema::required("message", FieldType::String),
];
const WAIT_SCHEMA: &[FieldSchema] = &[FieldSchema::optional("note", FieldType::String, None)];
const BRANCH_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("condition", FieldType::Object),
    FieldSchema::required("on_true", FieldType::Array),
    FieldSchema::optional("on_false", FieldType::Array, None),
];
const PARALLEL_SCHEMA: &[FieldSchema] = &[FieldSchema::required("steps", FieldType::Array)];
const CALL_WEBHOOK_SCHEMA: &[FieldSchema] = &[
    FieldSchema::required("url", FieldType::String),
    FieldSchema::optional("method", FieldType::String, Some("POST")),
    FieldSchema::optional("payload", FieldType::Object, None),
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// One field in an action's configuration schema.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSchema {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl FieldSchema {
    const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
            default: None,
        }
    }

    const fn optional(
        name: &'static str,
        field_type: FieldType,
        default: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default,
        }
    }
}

/// One unit of work in a rule's ordered action list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    pub action_type: ActionType,
    #[serde(default)]
    pub config: serde_json::Value,
    /// A failing step aborts the run unless this is set.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl ActionStep {
    pub fn new(action_type: ActionType, config: serde_json::Value) -> Self {
        Self {
            action_type,
            config,
            continue_on_error: false,
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

/// Result of executing an action against the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Configuration of a `Wait` step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default)]
    pub note: Option<String>,
}

/// Configuration of a `Branch` step: evaluate the condition list (implicit
/// AND) and splice the chosen fragment after the branch step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    pub condition: Vec<ConditionNode>,
    pub on_true: Vec<ActionStep>,
    #[serde(default)]
    pub on_false: Vec<ActionStep>,
}

/// Configuration of a `Parallel` step: an independent sub-batch run against
/// the same context, each member logged individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub steps: Vec<ActionStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: &[ActionType] = &[
        ActionType::GenerateDocument,
        ActionType::RequestDocument,
        ActionType::ArchiveDocument,
        ActionType::SendEmail,
        ActionType::SendSms,
        ActionType::SendTemplateMessage,
        ActionType::CreateTask,
        ActionType::CompleteTask,
        ActionType::ReassignTask,
        ActionType::UpdateClientField,
        ActionType::ChangeClientStage,
        ActionType::AddClientTag,
        ActionType::RemoveClientTag,
        ActionType::AddNote,
        ActionType::NotifyUser,
        ActionType::NotifyTeam,
        ActionType::Wait,
        ActionType::Branch,
        ActionType::Parallel,
        ActionType::CallWebhook,
    ];

    #[test]
    fn every_type_has_category_schema_and_description() {
        for ty in ALL_TYPES {
            let _ = ty.category();
            assert!(!ty.describe().is_empty());
            assert!(!ty.schema().is_empty());
        }
    }

    #[test]
    fn schemas_name_their_lead_field() {
        assert_eq!(ActionType::SendEmail.schema()[0].name, "to");
        assert_eq!(ActionType::CallWebhook.schema()[0].name, "url");
        assert!(ActionType::SendEmail.schema()[0].required);
        assert_eq!(ActionType::CreateTask.schema()[2].default, Some("3"));
    }

    #[test]
    fn flow_control_classification() {
        assert!(ActionType::Wait.is_flow_control());
        assert!(ActionType::Branch.is_flow_control());
        assert!(ActionType::Parallel.is_flow_control());
        assert!(!ActionType::SendEmail.is_flow_control());
    }

    #[test]
    fn continue_on_error_defaults_false() {
        let step: ActionStep = serde_json::from_value(serde_json::json!({
            "action_type": "create_task",
            "config": { "title": "Call client" }
        }))
        .unwrap();
        assert!(!step.continue_on_error);
        assert_eq!(step.action_type, ActionType::CreateTask);
    }
}
