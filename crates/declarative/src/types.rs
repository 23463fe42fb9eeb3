//! Core types for declarative reconciliation

use atlaskit::{ErrorCategory, PollConfig, RetryConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cluster,
    User,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource: a name scoped to a group.
///
/// Identities never change. A rename is a delete plus a create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub group_id: String,
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn cluster(group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            kind: ResourceKind::Cluster,
            name: name.into(),
        }
    }

    pub fn user(group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            kind: ResourceKind::User,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.group_id, self.name)
    }
}

/// Desired lifecycle state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Present,
    Absent,
}

/// When a declared password is sent for an existing user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordPolicy {
    /// Only when the user is created
    OnCreate,
    /// On create and on every update
    #[default]
    Always,
}

/// What was done (or planned) for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
    /// Waiting for a transitional status to end
    Defer,
    /// Actual state could not be read
    Fetch,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
            Self::Defer => "defer",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a resource failed to converge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Provisioning did not reach a terminal status in time
    Timeout,
    /// Atlas reported the `error` status
    RemoteError,
    /// The run was cancelled while waiting
    Cancelled,
    /// The request conflicts with the remote state
    Conflict { message: String },
    /// Any other API failure
    Api { category: String, message: String },
    /// A cluster in the same group never left its transitional status
    Blocked { cluster: String },
}

impl FailureReason {
    /// Map an API error to a failure reason.
    pub fn from_error(err: &atlaskit::Error) -> Self {
        match err.category() {
            ErrorCategory::Cancelled => Self::Cancelled,
            ErrorCategory::Conflict => Self::Conflict {
                message: err.to_string(),
            },
            category => Self::Api {
                category: category.as_str().to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for provisioning"),
            Self::RemoteError => f.write_str("Atlas reported an error status"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Conflict { message } => write!(f, "{message}"),
            Self::Api { message, .. } => write!(f, "{message}"),
            Self::Blocked { cluster } => write!(f, "cluster {cluster} did not settle"),
        }
    }
}

/// Why a resource was not touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already in the desired state
    NoChange,
    /// Dry run
    DryRun,
    /// The user declined the plan
    Declined,
    /// Cancelled before the operation started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoChange => "no change",
            Self::DryRun => "dry run",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Final status of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileStatus {
    Converged,
    Failed { reason: FailureReason },
    Skipped { reason: SkipReason },
}

impl ReconcileStatus {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => f.write_str("converged"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

/// Outcome for one declared resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub id: ResourceId,
    pub action: Action,
    #[serde(flatten)]
    pub status: ReconcileStatus,
    /// Fields sent in an update
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

impl ReconciliationResult {
    pub fn new(id: ResourceId, action: Action, status: ReconcileStatus) -> Self {
        Self {
            id,
            action,
            status,
            changed_fields: Vec::new(),
        }
    }

    /// Attach the changed field names.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.changed_fields = fields;
        self
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.skipped + self.failed + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ReconciliationResult) {
        match (&result.status, result.action) {
            (ReconcileStatus::Failed { .. }, _) => self.failed += 1,
            (
                ReconcileStatus::Skipped {
                    reason: SkipReason::NoChange,
                },
                _,
            )
            | (ReconcileStatus::Converged, Action::NoOp) => self.no_change += 1,
            (ReconcileStatus::Skipped { .. }, _) => self.skipped += 1,
            (ReconcileStatus::Converged, Action::Create) => self.created += 1,
            (ReconcileStatus::Converged, Action::Delete) => self.removed += 1,
            (ReconcileStatus::Converged, _) => self.modified += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Number of resources worked on in parallel
    pub jobs: usize,
    /// Retry policy for API calls
    pub retry: RetryConfig,
    /// Polling policy for cluster provisioning
    pub poll: PollConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

/// Results of one reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<ReconciliationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// No resource failed.
    pub fn is_success(&self) -> bool {
        !self.results.iter().any(|r| r.status.is_failed())
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for result in &self.results {
            summary.add_result(result);
        }
        summary
    }

    /// Result for one identity.
    pub fn result(&self, id: &ResourceId) -> Option<&ReconciliationResult> {
        self.results.iter().find(|r| &r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        let id = ResourceId::cluster("g1", "test-mongo");
        assert_eq!(id.to_string(), "cluster g1/test-mongo");
        assert_ne!(id, ResourceId::user("g1", "test-mongo"));
    }

    #[test]
    fn test_failure_reason_from_error() {
        let conflict = atlaskit::Error::from_status(409, "");
        assert!(matches!(
            FailureReason::from_error(&conflict),
            FailureReason::Conflict { .. }
        ));
        assert_eq!(
            FailureReason::from_error(&atlaskit::Error::Cancelled),
            FailureReason::Cancelled
        );
        match FailureReason::from_error(&atlaskit::Error::from_status(503, "")) {
            FailureReason::Api { category, .. } => assert_eq!(category, "transient"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_summary_counts() {
        let id = ResourceId::cluster("g", "c");
        let results = vec![
            ReconciliationResult::new(id.clone(), Action::Create, ReconcileStatus::Converged),
            ReconciliationResult::new(id.clone(), Action::Update, ReconcileStatus::Converged),
            ReconciliationResult::new(id.clone(), Action::Delete, ReconcileStatus::Converged),
            ReconciliationResult::new(
                id.clone(),
                Action::NoOp,
                ReconcileStatus::skipped(SkipReason::NoChange),
            ),
            ReconciliationResult::new(
                id.clone(),
                Action::Create,
                ReconcileStatus::skipped(SkipReason::DryRun),
            ),
            ReconciliationResult::new(
                id,
                Action::Create,
                ReconcileStatus::failed(FailureReason::Timeout),
            ),
        ];

        let mut summary = ExecuteSummary::default();
        for r in &results {
            summary.add_result(r);
        }
        assert_eq!(summary.created, 1);
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.no_change, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 6);
        assert_eq!(summary.total_changes(), 3);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_result_serializes_flat() {
        let result = ReconciliationResult::new(
            ResourceId::user("g1", "app"),
            Action::Create,
            ReconcileStatus::failed(FailureReason::Blocked {
                cluster: "test-mongo".into(),
            }),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"]["reason"], "blocked");
        assert_eq!(value["reason"]["cluster"], "test-mongo");
        assert_eq!(value["id"]["kind"], "user");
    }

    #[test]
    fn test_password_policy_default() {
        assert_eq!(PasswordPolicy::default(), PasswordPolicy::Always);
        assert_eq!(LifecycleState::default(), LifecycleState::Present);
    }
}
