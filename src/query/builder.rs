//! Fluent builder for remote task and audit log queries
//!
//! Criteria accumulate as typed terms and compile into one of two request
//! objects: a task query, which acts on behalf of a user, or an audit query,
//! which does not.

use crate::error::{CrucibleError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Fields criteria can accumulate under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    DeploymentId,
    ProcessId,
    ProcessVersion,
    ProcessInstanceId,
    ProcessInstanceStatus,
    StartDate,
    EndDate,
    WorkItemId,
    TaskId,
    TaskStatus,
    Initiator,
    Stakeholder,
    PotentialOwner,
    TaskOwner,
    BusinessAdmin,
    VariableId,
    Value,
    OldValue,
}

/// Task lifecycle status usable as a criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Ready,
    Reserved,
    InProgress,
    Suspended,
    Completed,
    Failed,
    Error,
    Exited,
    Obsolete,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Reserved => write!(f, "reserved"),
            TaskStatus::InProgress => write!(f, "inprogress"),
            TaskStatus::Suspended => write!(f, "suspended"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Exited => write!(f, "exited"),
            TaskStatus::Obsolete => write!(f, "obsolete"),
        }
    }
}

/// One accumulated predicate term
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Term {
    /// Match any of the listed strings
    Strings(Vec<String>),
    /// Match any of the listed 32-bit values
    Ints(Vec<i32>),
    /// Match any of the listed 64-bit values
    Longs(Vec<i64>),
    /// Match any of the listed instants
    Dates(Vec<DateTime<Utc>>),
    /// Match any of the listed task statuses
    Statuses(Vec<TaskStatus>),
    /// Match instants between an inclusive minimum and an inclusive maximum
    DateRange {
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    },
}

/// How accumulated criteria combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// All criteria must match
    #[default]
    Intersect,
    /// Any criterion may match
    Union,
}

/// Accumulated criteria shared by both request kinds
#[derive(Debug, Clone, Default, Serialize)]
pub struct CriteriaSet {
    /// Terms in accumulation order
    pub terms: Vec<(QueryField, Term)>,
    /// Combination mode
    pub combinator: Combinator,
    /// Restrict results to the most recent revision of each tracked value
    pub only_latest: bool,
}

/// Task-log query, issued on behalf of a user
#[derive(Debug, Clone, Serialize)]
pub struct TaskQueryRequest {
    /// Acting user
    pub user_id: String,
    /// Accumulated criteria
    pub criteria: CriteriaSet,
}

/// Audit-log query, not bound to a user
#[derive(Debug, Clone, Serialize)]
pub struct AuditQueryRequest {
    /// Accumulated criteria
    pub criteria: CriteriaSet,
}

/// Fluent accumulator of query criteria
///
/// Criteria default to conjunctive combination. A builder created without a
/// user id starts with the only-latest marker armed and can only compile
/// audit queries; [`for_user`](Self::for_user) additionally enables task
/// queries.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    acting_user: Option<String>,
    criteria: CriteriaSet,
}

impl QueryBuilder {
    /// Builder with no acting user, restricted to latest variable revisions
    pub fn new() -> Self {
        Self {
            acting_user: None,
            criteria: CriteriaSet {
                only_latest: true,
                ..CriteriaSet::default()
            },
        }
    }

    /// Builder issuing task queries on behalf of `user`
    pub fn for_user(user: &str) -> Self {
        Self {
            acting_user: Some(user.to_string()),
            criteria: CriteriaSet::default(),
        }
    }

    /// Require all criteria to match
    pub fn intersect(mut self) -> Self {
        self.criteria.combinator = Combinator::Intersect;
        self
    }

    /// Allow any criterion to match
    pub fn union(mut self) -> Self {
        self.criteria.combinator = Combinator::Union;
        self
    }

    /// Restrict results to the most recent revision of each tracked value
    pub fn only_latest(mut self) -> Self {
        self.criteria.only_latest = true;
        self
    }

    /// Drop all accumulated criteria and re-arm conjunctive combination
    pub fn clear(mut self) -> Self {
        self.criteria = CriteriaSet::default();
        self
    }

    // process related criteria

    /// Add one or more deployment ids as a criterion
    pub fn deployment_id(self, ids: &[&str]) -> Self {
        self.strings(QueryField::DeploymentId, ids)
    }

    /// Add one or more process ids as a criterion
    pub fn process_id(self, ids: &[&str]) -> Self {
        self.strings(QueryField::ProcessId, ids)
    }

    /// Add one or more process versions as a criterion
    pub fn process_version(self, versions: &[&str]) -> Self {
        self.strings(QueryField::ProcessVersion, versions)
    }

    /// Add one or more process instance ids as a criterion
    pub fn process_instance_id(mut self, ids: &[i64]) -> Self {
        self.push(QueryField::ProcessInstanceId, Term::Longs(ids.to_vec()));
        self
    }

    /// Add one or more process instance statuses as a criterion
    pub fn process_instance_status(mut self, statuses: &[i32]) -> Self {
        self.push(
            QueryField::ProcessInstanceStatus,
            Term::Ints(statuses.to_vec()),
        );
        self
    }

    /// Add one or more start dates as a criterion
    pub fn start_date(mut self, dates: &[DateTime<Utc>]) -> Self {
        self.push(QueryField::StartDate, Term::Dates(dates.to_vec()));
        self
    }

    /// Bound start dates from below, inclusive
    pub fn start_date_min(mut self, min: DateTime<Utc>) -> Self {
        self.range(QueryField::StartDate, Some(min), None);
        self
    }

    /// Bound start dates from above, inclusive
    pub fn start_date_max(mut self, max: DateTime<Utc>) -> Self {
        self.range(QueryField::StartDate, None, Some(max));
        self
    }

    /// Add one or more end dates as a criterion
    pub fn end_date(mut self, dates: &[DateTime<Utc>]) -> Self {
        self.push(QueryField::EndDate, Term::Dates(dates.to_vec()));
        self
    }

    /// Bound end dates from below, inclusive
    pub fn end_date_min(mut self, min: DateTime<Utc>) -> Self {
        self.range(QueryField::EndDate, Some(min), None);
        self
    }

    /// Bound end dates from above, inclusive
    pub fn end_date_max(mut self, max: DateTime<Utc>) -> Self {
        self.range(QueryField::EndDate, None, Some(max));
        self
    }

    // task related criteria

    /// Add one or more work item ids as a criterion
    pub fn work_item_id(mut self, ids: &[i64]) -> Self {
        self.push(QueryField::WorkItemId, Term::Longs(ids.to_vec()));
        self
    }

    /// Add one or more task ids as a criterion
    pub fn task_id(mut self, ids: &[i64]) -> Self {
        self.push(QueryField::TaskId, Term::Longs(ids.to_vec()));
        self
    }

    /// Add one or more task statuses as a criterion
    pub fn task_status(mut self, statuses: &[TaskStatus]) -> Self {
        self.push(QueryField::TaskStatus, Term::Statuses(statuses.to_vec()));
        self
    }

    /// Add one or more initiator ids as a criterion
    pub fn initiator(self, ids: &[&str]) -> Self {
        self.strings(QueryField::Initiator, ids)
    }

    /// Add one or more stakeholder ids as a criterion
    pub fn stakeholder(self, ids: &[&str]) -> Self {
        self.strings(QueryField::Stakeholder, ids)
    }

    /// Add one or more potential owner ids as a criterion
    pub fn potential_owner(self, ids: &[&str]) -> Self {
        self.strings(QueryField::PotentialOwner, ids)
    }

    /// Add one or more task owner ids as a criterion
    pub fn task_owner(self, ids: &[&str]) -> Self {
        self.strings(QueryField::TaskOwner, ids)
    }

    /// Add one or more business administrator ids as a criterion
    pub fn business_admin(self, ids: &[&str]) -> Self {
        self.strings(QueryField::BusinessAdmin, ids)
    }

    // variable related criteria

    /// Add one or more variable ids as a criterion
    pub fn variable_id(self, ids: &[&str]) -> Self {
        self.strings(QueryField::VariableId, ids)
    }

    /// Add one or more variable values as a criterion
    pub fn value(self, values: &[&str]) -> Self {
        self.strings(QueryField::Value, values)
    }

    /// Add one or more previous variable values as a criterion
    pub fn old_value(self, values: &[&str]) -> Self {
        self.strings(QueryField::OldValue, values)
    }

    // request generation

    /// Compile a task query; requires an acting user
    pub fn build_task_query(&self) -> Result<TaskQueryRequest> {
        let user_id = self.acting_user.clone().ok_or_else(|| {
            CrucibleError::InvalidRequest(
                "an acting user id is required to build a task query".to_string(),
            )
        })?;
        Ok(TaskQueryRequest {
            user_id,
            criteria: self.criteria.clone(),
        })
    }

    /// Compile an audit query
    pub fn build_audit_query(&self) -> AuditQueryRequest {
        AuditQueryRequest {
            criteria: self.criteria.clone(),
        }
    }

    fn strings(mut self, field: QueryField, values: &[&str]) -> Self {
        self.push(
            field,
            Term::Strings(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    fn push(&mut self, field: QueryField, term: Term) {
        self.criteria.terms.push((field, term));
    }

    /// Merge a bound into the field's range term, creating it on first use
    fn range(&mut self, field: QueryField, min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) {
        for (existing, term) in self.criteria.terms.iter_mut() {
            if *existing == field {
                if let Term::DateRange {
                    min: existing_min,
                    max: existing_max,
                } = term
                {
                    if min.is_some() {
                        *existing_min = min;
                    }
                    if max.is_some() {
                        *existing_max = max;
                    }
                    return;
                }
            }
        }
        self.criteria.terms.push((field, Term::DateRange { min, max }));
    }
}
