//! Execution planner - orders change operations into phases

use crate::diff::{ChangeOperation, DiffSummary};
use crate::error::{Error, Result};
use crate::types::{ReconciliationResult, ResourceId, ResourceKind};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Ordered phase of a plan.
///
/// Clusters go before users because users may hold roles on databases
/// that live in those clusters. Deletions go before creations so a name
/// freed in this run can be reused in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseKind {
    ClusterDeletes,
    ClusterChanges,
    UserDeletes,
    UserChanges,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 4] = [
        Self::ClusterDeletes,
        Self::ClusterChanges,
        Self::UserDeletes,
        Self::UserChanges,
    ];

    fn for_operation(op: &ChangeOperation) -> Option<Self> {
        if op.is_noop() {
            return None;
        }
        Some(match (op.target.kind, op.is_removal()) {
            (ResourceKind::Cluster, true) => Self::ClusterDeletes,
            (ResourceKind::Cluster, false) => Self::ClusterChanges,
            (ResourceKind::User, true) => Self::UserDeletes,
            (ResourceKind::User, false) => Self::UserChanges,
        })
    }

    /// Whether this phase works on users.
    pub fn is_user_phase(&self) -> bool {
        matches!(self, Self::UserDeletes | Self::UserChanges)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ClusterDeletes => "Deleting clusters",
            Self::ClusterChanges => "Provisioning clusters",
            Self::UserDeletes => "Deleting users",
            Self::UserChanges => "Provisioning users",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operations that run together
#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub operations: Vec<ChangeOperation>,
}

/// An execution plan with operations grouped into ordered phases
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Non-empty phases, in execution order
    pub phases: Vec<Phase>,
    /// Resources already in the desired state
    pub unchanged: Vec<ChangeOperation>,
    /// Resources whose actual state could not be read
    pub failed: Vec<ReconciliationResult>,
    /// Declaration order, used to sort results
    order: HashMap<ResourceId, usize>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from operations in declaration order.
    ///
    /// Fails if two operations target the same identity.
    pub fn from_operations(ops: Vec<ChangeOperation>) -> Result<Self> {
        let mut plan = Self::new();
        let mut seen = HashSet::new();
        let mut buckets: HashMap<PhaseKind, Vec<ChangeOperation>> = HashMap::new();

        for (index, op) in ops.into_iter().enumerate() {
            if !seen.insert(op.target.clone()) {
                return Err(Error::DuplicateIdentity(op.target));
            }
            plan.order.insert(op.target.clone(), index);

            match PhaseKind::for_operation(&op) {
                Some(kind) => buckets.entry(kind).or_default().push(op),
                None => plan.unchanged.push(op),
            }
        }

        plan.phases = PhaseKind::ALL
            .iter()
            .filter_map(|kind| {
                buckets.remove(kind).map(|operations| Phase {
                    kind: *kind,
                    operations,
                })
            })
            .collect();
        Ok(plan)
    }

    /// Attach results for resources that could not be observed.
    pub fn with_failures(mut self, failed: Vec<ReconciliationResult>) -> Self {
        let next = self.order.len();
        for (offset, result) in failed.iter().enumerate() {
            self.order.entry(result.id.clone()).or_insert(next + offset);
        }
        self.failed = failed;
        self
    }

    /// Position of an identity in declaration order.
    pub fn position(&self, id: &ResourceId) -> usize {
        self.order.get(id).copied().unwrap_or(usize::MAX)
    }

    /// Record declaration order.
    pub fn set_order(&mut self, order: impl IntoIterator<Item = ResourceId>) {
        for (index, id) in order.into_iter().enumerate() {
            self.order.insert(id, index);
        }
    }

    /// All operations that change something, in execution order
    pub fn changes(&self) -> impl Iterator<Item = &ChangeOperation> {
        self.phases.iter().flat_map(|p| p.operations.iter())
    }

    /// Every operation, changes first
    pub fn operations(&self) -> impl Iterator<Item = &ChangeOperation> {
        self.changes().chain(self.unchanged.iter())
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_operations(self.operations())
    }

    /// Number of operations that change something
    pub fn total_changes(&self) -> usize {
        self.phases.iter().map(|p| p.operations.len()).sum()
    }

    /// Check if plan has nothing to do
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Keep only operations and observation failures matching a target filter.
    ///
    /// Target format: "cluster", "user", or "kind.name".
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        let Some(t) = target else {
            return self;
        };
        let (kind, name) = parse_target(t);
        let keep = |id: &ResourceId| {
            kind.is_none_or(|k| id.kind.as_str() == k)
                && name.as_deref().is_none_or(|n| id.name == n)
        };

        Self {
            phases: self
                .phases
                .into_iter()
                .filter_map(|phase| {
                    let operations: Vec<_> =
                        phase.operations.into_iter().filter(|op| keep(&op.target)).collect();
                    (!operations.is_empty()).then_some(Phase {
                        kind: phase.kind,
                        operations,
                    })
                })
                .collect(),
            unchanged: self
                .unchanged
                .into_iter()
                .filter(|op| keep(&op.target))
                .collect(),
            failed: self.failed.into_iter().filter(|r| keep(&r.id)).collect(),
            order: self.order,
        }
    }
}

/// Parse a target string like "cluster.name" into (kind, name)
fn parse_target(target: &str) -> (Option<&str>, Option<String>) {
    match target.split_once('.') {
        None if matches!(target, "cluster" | "clusters") => (Some("cluster"), None),
        None if matches!(target, "user" | "users") => (Some("user"), None),
        None => (None, Some(target.to_string())),
        Some((kind, name)) => {
            let kind = match kind {
                "clusters" => "cluster",
                "users" => "user",
                other => other,
            };
            (Some(kind), Some(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChangeKind, CreatePayload, diff};
    use crate::resource::{ActualResource, DesiredCluster, DesiredResource, DesiredUser};
    use crate::types::{Action, FailureReason, ReconcileStatus};
    use atlaskit::{ClusterSpec, ClusterState, InstanceSize, ProvisioningStatus, UserSpec};

    fn create_user(name: &str) -> ChangeOperation {
        let desired: DesiredResource =
            DesiredUser::present("g1", UserSpec::new(name).password("pw")).into();
        diff(&desired, None)
    }

    fn delete_cluster(name: &str) -> ChangeOperation {
        let desired: DesiredResource =
            DesiredCluster::absent("g1", ClusterSpec::new(name, InstanceSize::M10)).into();
        let actual = ActualResource::Cluster(ClusterState::from_spec(
            &ClusterSpec::new(name, InstanceSize::M10),
            ProvisioningStatus::Idle,
        ));
        diff(&desired, Some(&actual))
    }

    fn create_cluster(name: &str) -> ChangeOperation {
        let desired: DesiredResource =
            DesiredCluster::present("g1", ClusterSpec::new(name, InstanceSize::M10)).into();
        diff(&desired, None)
    }

    #[test]
    fn test_phase_order() {
        let plan = ExecutionPlan::from_operations(vec![
            create_user("app"),
            create_cluster("new"),
            delete_cluster("old"),
        ])
        .unwrap();

        let kinds: Vec<PhaseKind> = plan.phases.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PhaseKind::ClusterDeletes,
                PhaseKind::ClusterChanges,
                PhaseKind::UserChanges
            ]
        );
        assert_eq!(plan.total_changes(), 3);
        assert!(matches!(
            plan.changes().next().map(|op| &op.kind),
            Some(ChangeKind::Delete)
        ));
    }

    #[test]
    fn test_noops_are_not_scheduled() {
        let desired: DesiredResource =
            DesiredUser::absent("g1", UserSpec::new("gone")).into();
        let plan = ExecutionPlan::from_operations(vec![diff(&desired, None)]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.summary().unchanged, 1);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let result = ExecutionPlan::from_operations(vec![create_user("app"), create_user("app")]);
        assert!(matches!(result, Err(Error::DuplicateIdentity(_))));
    }

    #[test]
    fn test_declaration_order_recorded() {
        let plan =
            ExecutionPlan::from_operations(vec![create_user("app"), create_cluster("c")]).unwrap();
        assert_eq!(plan.position(&ResourceId::user("g1", "app")), 0);
        assert_eq!(plan.position(&ResourceId::cluster("g1", "c")), 1);
        assert_eq!(plan.position(&ResourceId::cluster("g1", "other")), usize::MAX);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("cluster"), (Some("cluster"), None));
        assert_eq!(parse_target("users"), (Some("user"), None));
        assert_eq!(
            parse_target("cluster.test-mongo"),
            (Some("cluster"), Some("test-mongo".to_string()))
        );
        assert_eq!(parse_target("app"), (None, Some("app".to_string())));
    }

    #[test]
    fn test_filter_by_target() {
        let plan = ExecutionPlan::from_operations(vec![
            create_user("app"),
            create_cluster("new"),
            delete_cluster("old"),
        ])
        .unwrap();

        let clusters = plan.clone().filter_by_target(Some("cluster"));
        assert_eq!(clusters.total_changes(), 2);

        let one = plan.filter_by_target(Some("cluster.new"));
        assert_eq!(one.total_changes(), 1);
        assert!(matches!(
            one.changes().next().map(|op| &op.kind),
            Some(ChangeKind::Create(CreatePayload::Cluster(_)))
        ));
    }

    #[test]
    fn test_filter_drops_unselected_fetch_failures() {
        let unreadable = |id: ResourceId| {
            ReconciliationResult::new(
                id,
                Action::Fetch,
                ReconcileStatus::failed(FailureReason::Api {
                    category: "transient".to_string(),
                    message: "500".to_string(),
                }),
            )
        };
        let plan = ExecutionPlan::from_operations(vec![create_cluster("c")])
            .unwrap()
            .with_failures(vec![
                unreadable(ResourceId::user("g1", "app")),
                unreadable(ResourceId::cluster("g1", "flaky")),
            ]);

        let clusters = plan.clone().filter_by_target(Some("cluster"));
        assert_eq!(clusters.failed.len(), 1);
        assert_eq!(clusters.failed[0].id, ResourceId::cluster("g1", "flaky"));

        let one = plan.clone().filter_by_target(Some("cluster.c"));
        assert!(one.failed.is_empty());
        assert_eq!(one.total_changes(), 1);

        assert_eq!(plan.filter_by_target(None).failed.len(), 2);
    }
}
