// Workflow Conditions - recursive boolean condition trees gating rule runs
//
// Evaluation is pure: all domain reads happen once up front when the
// SubjectContext snapshot is loaded, after which the tree is evaluated
// synchronously. Malformed trees fail closed (not matched) instead of
// raising; callers check `success` to tell the two apart.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::models::{Actor, Client, Document, Scenario, TaskItem};
use crate::store::DomainStore;

/// Comparison operators for numeric and temporal predicates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

impl CompareOp {
    pub fn compare<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Lt => left < right,
            Self::Eq => left == right,
            Self::Gte => left >= right,
            Self::Lte => left <= right,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// Which related collection a relational predicate inspects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Documents,
    Tasks,
    Scenarios,
}

/// A leaf predicate against the subject client, the actor, or the clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "predicate")]
pub enum Predicate {
    /// Subject status equals the given value.
    ClientStatusEquals { value: String },
    /// Subject carries the given tag.
    ClientHasTag { value: String },
    /// Age in days since the subject was created.
    ClientAgeDays { op: CompareOp, value: i64 },
    /// Count of related child records, optionally filtered by a sub-field
    /// ("category" or "status" for documents, "status" for tasks).
    RelatedCount {
        relation: Relation,
        #[serde(default)]
        filter_field: Option<String>,
        #[serde(default)]
        filter_value: Option<String>,
        op: CompareOp,
        value: i64,
    },
    /// At least one related record of the given kind is overdue.
    HasOverdueRelated { relation: Relation },
    /// Matches if ANY scenario amount satisfies the operator.
    ScenarioAmountAny { op: CompareOp, value: f64 },
    /// The acting user's role equals the given value.
    ActorRoleEquals { value: String },
    /// Wall-clock time of day falls inside [start, end], with overnight
    /// wrap: {start: "22:00", end: "06:00"} matches 23:00 and 02:00.
    TimeOfDayWindow { start: String, end: String },
    /// Current day of week is in the list; entries are numeric 0-6
    /// (Sunday = 0) or case-insensitive day names.
    DayOfWeekIn { days: Vec<serde_json::Value> },
}

/// Recursive condition tree: a leaf predicate or an AND/OR combinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ConditionNode {
    All { children: Vec<ConditionNode> },
    Any { children: Vec<ConditionNode> },
    Leaf {
        #[serde(flatten)]
        predicate: Predicate,
    },
}

impl ConditionNode {
    pub fn all(children: Vec<ConditionNode>) -> Self {
        Self::All { children }
    }

    pub fn any(children: Vec<ConditionNode>) -> Self {
        Self::Any { children }
    }

    pub fn leaf(predicate: Predicate) -> Self {
        Self::Leaf { predicate }
    }
}

/// Result of evaluating a condition tree.
///
/// `success=false` means the tree was structurally unevaluable (unknown
/// day name, zero-child combinator, bad time literal); `matched` is always
/// false in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub matched: bool,
    pub success: bool,
    pub diagnostic: String,
}

impl Evaluation {
    fn matched(diagnostic: impl Into<String>) -> Self {
        Self {
            matched: true,
            success: true,
            diagnostic: diagnostic.into(),
        }
    }

    fn unmatched(diagnostic: impl Into<String>) -> Self {
        Self {
            matched: false,
            success: true,
            diagnostic: diagnostic.into(),
        }
    }

    fn malformed(diagnostic: impl Into<String>) -> Self {
        Self {
            matched: false,
            success: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Read-only snapshot of everything condition evaluation may touch.
#[derive(Debug, Clone)]
pub struct SubjectContext {
    pub subject_id: Option<Uuid>,
    pub client: Option<Client>,
    pub documents: Vec<Document>,
    pub tasks: Vec<TaskItem>,
    pub scenarios: Vec<Scenario>,
    pub actor: Option<Actor>,
    pub payload: serde_json::Value,
    pub now: DateTime<Utc>,
}

impl SubjectContext {
    /// Load the snapshot for a subject from the domain store. Related
    /// collections are only fetched when the subject exists.
    pub async fn load(
        store: &dyn DomainStore,
        subject_id: Option<Uuid>,
        actor: Option<Actor>,
        payload: serde_json::Value,
        clock: &dyn Clock,
    ) -> EngineResult<Self> {
        let mut ctx = Self {
            subject_id,
            client: None,
            documents: Vec::new(),
            tasks: Vec::new(),
            scenarios: Vec::new(),
            actor,
            payload,
            now: clock.now(),
        };

        if let Some(id) = subject_id {
            ctx.client = store.client(id).await?;
            if ctx.client.is_some() {
                ctx.documents = store.documents_for(id).await?;
                ctx.tasks = store.tasks_for(id).await?;
                ctx.scenarios = store.scenarios_for(id).await?;
            }
        }

        Ok(ctx)
    }

    /// Snapshot without any domain lookups, for clock-only trees and tests.
    pub fn detached(payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: None,
            client: None,
            documents: Vec::new(),
            tasks: Vec::new(),
            scenarios: Vec::new(),
            actor: None,
            payload,
            now,
        }
    }
}

/// Evaluate an implicit-AND list of nodes. An empty list always matches,
/// as does a rule with no condition tree at all.
pub fn evaluate_tree(nodes: &[ConditionNode], ctx: &SubjectContext) -> Evaluation {
    if nodes.is_empty() {
        return Evaluation::matched("no conditions; unconditionally matched");
    }
    if nodes.len() == 1 {
        return evaluate_node(&nodes[0], ctx);
    }
    evaluate_node(
        &ConditionNode::All {
            children: nodes.to_vec(),
        },
        ctx,
    )
}

/// Evaluate a single node. All children are always evaluated so the
/// diagnostic reflects the whole tree.
pub fn evaluate_node(node: &ConditionNode, ctx: &SubjectContext) -> Evaluation {
    match node {
        ConditionNode::All { children } => evaluate_combinator("AND", children, ctx, true),
        ConditionNode::Any { children } => evaluate_combinator("OR", children, ctx, false),
        ConditionNode::Leaf { predicate } => evaluate_leaf(predicate, ctx),
    }
}

fn evaluate_combinator(
    label: &str,
    children: &[ConditionNode],
    ctx: &SubjectContext,
    require_all: bool,
) -> Evaluation {
    if children.is_empty() {
        return Evaluation::malformed(format!("{label} combinator has no children"));
    }

    let results: Vec<Evaluation> = children.iter().map(|c| evaluate_node(c, ctx)).collect();
    let success = results.iter().all(|r| r.success);
    let matched = if require_all {
        results.iter().all(|r| r.matched)
    } else {
        results.iter().any(|r| r.matched)
    };

    let parts: Vec<String> = results
        .iter()
        .map(|r| {
            if r.matched {
                format!("✓ {}", r.diagnostic)
            } else {
                format!("✗ {}", r.diagnostic)
            }
        })
        .collect();
    let diagnostic = format!("{label}[{}]", parts.join("; "));

    if !success {
        return Evaluation::malformed(diagnostic);
    }
    Evaluation {
        matched,
        success: true,
        diagnostic,
    }
}

fn evaluate_leaf(predicate: &Predicate, ctx: &SubjectContext) -> Evaluation {
    match predicate {
        Predicate::ClientStatusEquals { value } => match &ctx.client {
            Some(client) if client.status.eq_ignore_ascii_case(value) => {
                Evaluation::matched(format!("status is {value}"))
            }
            Some(client) => Evaluation::unmatched(format!(
                "status is {}, expected {value}",
                client.status
            )),
            None => Evaluation::unmatched("no subject client loaded"),
        },

        Predicate::ClientHasTag { value } => match &ctx.client {
            Some(client) if client.tags.iter().any(|t| t.eq_ignore_ascii_case(value)) => {
                Evaluation::matched(format!("has tag {value}"))
            }
            Some(_) => Evaluation::unmatched(format!("missing tag {value}")),
            None => Evaluation::unmatched("no subject client loaded"),
        },

        Predicate::ClientAgeDays { op, value } => match &ctx.client {
            Some(client) => {
                let age = (ctx.now - client.created_at).num_days();
                if op.compare(age, *value) {
                    Evaluation::matched(format!("age {age}d {} {value}d", op.symbol()))
                } else {
                    Evaluation::unmatched(format!("age {age}d not {} {value}d", op.symbol()))
                }
            }
            None => Evaluation::unmatched("no subject client loaded"),
        },

        Predicate::RelatedCount {
            relation,
            filter_field,
            filter_value,
            op,
            value,
        } => {
            let count = match related_count(relation, filter_field, filter_value, ctx) {
                Ok(count) => count,
                Err(msg) => return Evaluation::malformed(msg),
            };
            if op.compare(count, *value) {
                Evaluation::matched(format!(
                    "{relation:?} count {count} {} {value}",
                    op.symbol()
                ))
            } else {
                Evaluation::unmatched(format!(
                    "{relation:?} count {count} not {} {value}",
                    op.symbol()
                ))
            }
        }

        Predicate::HasOverdueRelated { relation } => {
            let overdue = match relation {
                Relation::Tasks => ctx.tasks.iter().any(|t| t.is_overdue(ctx.now)),
                Relation::Documents => ctx
                    .documents
                    .iter()
                    .any(|d| d.due_date.map(|due| due < ctx.now).unwrap_or(false)),
                Relation::Scenarios => false,
            };
            if overdue {
                Evaluation::matched(format!("overdue {relation:?} present"))
            } else {
                Evaluation::unmatched(format!("no overdue {relation:?}"))
            }
        }

        Predicate::ScenarioAmountAny { op, value } => {
            let hit = ctx
                .scenarios
                .iter()
                .find(|s| op.compare(s.amount, *value));
            match hit {
                Some(s) => Evaluation::matched(format!(
                    "scenario '{}' amount {} {} {value}",
                    s.name,
                    s.amount,
                    op.symbol()
                )),
                None => Evaluation::unmatched(format!(
                    "no scenario amount {} {value}",
                    op.symbol()
                )),
            }
        }

        Predicate::ActorRoleEquals { value } => match &ctx.actor {
            Some(actor) if actor.role.eq_ignore_ascii_case(value) => {
                Evaluation::matched(format!("actor role is {value}"))
            }
            Some(actor) => {
                Evaluation::unmatched(format!("actor role is {}, expected {value}", actor.role))
            }
            None => Evaluation::unmatched("no actor on event"),
        },

        Predicate::TimeOfDayWindow { start, end } => {
            let (start_t, end_t) = match (parse_hhmm(start), parse_hhmm(end)) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    return Evaluation::malformed(format!(
                        "invalid time window {start}..{end}, expected HH:MM"
                    ))
                }
            };
            let now_t = NaiveTime::from_hms_opt(ctx.now.hour(), ctx.now.minute(), 0)
                .unwrap_or_default();
            // Overnight windows wrap past midnight.
            let inside = if start_t <= end_t {
                now_t >= start_t && now_t <= end_t
            } else {
                now_t >= start_t || now_t <= end_t
            };
            if inside {
                Evaluation::matched(format!("{now_t} inside {start}..{end}"))
            } else {
                Evaluation::unmatched(format!("{now_t} outside {start}..{end}"))
            }
        }

        Predicate::DayOfWeekIn { days } => {
            if days.is_empty() {
                return Evaluation::malformed("day_of_week_in has no days");
            }
            let today = ctx.now.weekday().num_days_from_sunday(); // Sunday = 0
            let mut allowed = Vec::with_capacity(days.len());
            for day in days {
                match parse_day(day) {
                    Some(n) => allowed.push(n),
                    None => {
                        return Evaluation::malformed(format!("unrecognized day entry {day}"))
                    }
                }
            }
            if allowed.contains(&today) {
                Evaluation::matched(format!("weekday {today} in allowed set"))
            } else {
                Evaluation::unmatched(format!("weekday {today} not in allowed set"))
            }
        }
    }
}

fn related_count(
    relation: &Relation,
    filter_field: &Option<String>,
    filter_value: &Option<String>,
    ctx: &SubjectContext,
) -> Result<i64, String> {
    let filter = match (filter_field, filter_value) {
        (Some(field), Some(value)) => Some((field.as_str(), value.as_str())),
        (None, None) => None,
        _ => return Err("related_count filter needs both field and value".into()),
    };

    if let Some((field, _)) = filter {
        let known = match relation {
            Relation::Documents => matches!(field, "category" | "status"),
            Relation::Tasks => field == "status",
            Relation::Scenarios => false,
        };
        if !known {
            return Err(format!("unknown filter field '{field}' for {relation:?}"));
        }
    }

    let count = match relation {
        Relation::Documents => ctx
            .documents
            .iter()
            .filter(|d| match filter {
                Some(("category", v)) => d
                    .category
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(v))
                    .unwrap_or(false),
                Some((_, v)) => d.status.eq_ignore_ascii_case(v),
                None => true,
            })
            .count(),
        Relation::Tasks => ctx
            .tasks
            .iter()
            .filter(|t| match filter {
                Some((_, v)) => t.status.eq_ignore_ascii_case(v),
                None => true,
            })
            .count(),
        Relation::Scenarios => ctx.scenarios.len(),
    };

    Ok(count as i64)
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn parse_day(value: &serde_json::Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return if n <= 6 { Some(n as u32) } else { None };
    }
    let name = value.as_str()?.to_ascii_lowercase();
    match name.as_str() {
        "sunday" | "sun" => Some(0),
        "monday" | "mon" => Some(1),
        "tuesday" | "tue" => Some(2),
        "wednesday" | "wed" => Some(3),
        "thursday" | "thu" => Some(4),
        "friday" | "fri" => Some(5),
        "saturday" | "sat" => Some(6),
        _ => None,
    }
}
