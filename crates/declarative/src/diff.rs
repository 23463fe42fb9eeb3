//! State comparator
//!
//! [`diff`] compares one declared resource against what Atlas last
//! reported and yields the single operation that moves it toward the
//! declared state. It has no side effects.

use crate::resource::{ActualResource, DesiredCluster, DesiredResource, DesiredUser};
use crate::types::{Action, LifecycleState, PasswordPolicy, ResourceId};
use atlaskit::{
    ClusterSpec, ClusterState, ClusterUpdate, ProvisioningStatus, UserSpec, UserState, UserUpdate,
};

/// Disk sizes closer than this are equal.
const DISK_SIZE_EPSILON: f64 = 0.01;

/// Full payload for a create call
#[derive(Debug, Clone, PartialEq)]
pub enum CreatePayload {
    Cluster(ClusterSpec),
    User(UserSpec),
}

/// Changed fields for an update call
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    Cluster(ClusterUpdate),
    User(UserUpdate),
}

impl UpdatePayload {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        match self {
            Self::Cluster(u) => u.changed_fields(),
            Self::User(u) => u.changed_fields(),
        }
    }
}

/// Kind of change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Create(CreatePayload),
    Update(UpdatePayload),
    Delete,
    NoOp,
    /// Nothing can be sent now because an operation is in progress.
    /// The declared resource is kept so it can be compared again once
    /// the status is terminal.
    Defer {
        status: ProvisioningStatus,
        desired: Box<DesiredResource>,
    },
}

/// One operation against one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeOperation {
    pub target: ResourceId,
    pub kind: ChangeKind,
    /// Human-readable description
    pub description: String,
}

impl ChangeOperation {
    pub fn action(&self) -> Action {
        match self.kind {
            ChangeKind::Create(_) => Action::Create,
            ChangeKind::Update(_) => Action::Update,
            ChangeKind::Delete => Action::Delete,
            ChangeKind::NoOp => Action::NoOp,
            ChangeKind::Defer { .. } => Action::Defer,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, ChangeKind::NoOp)
    }

    /// Check if this operation represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(self.kind, ChangeKind::Create(_))
    }

    /// Check if this operation represents a removal
    pub fn is_removal(&self) -> bool {
        matches!(self.kind, ChangeKind::Delete)
    }

    /// Check if this operation represents a modification
    pub fn is_modification(&self) -> bool {
        matches!(self.kind, ChangeKind::Update(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, ChangeKind::Defer { .. })
    }

    /// Names of the fields an update would send.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        match &self.kind {
            ChangeKind::Update(payload) => payload.changed_fields(),
            _ => Vec::new(),
        }
    }
}

/// Compare a declared resource with its actual state.
///
/// `actual` is `None` when the resource does not exist. A resource of the
/// wrong kind is treated as absent.
pub fn diff(desired: &DesiredResource, actual: Option<&ActualResource>) -> ChangeOperation {
    let kind = match desired {
        DesiredResource::Cluster(cluster) => {
            diff_cluster(cluster, actual.and_then(ActualResource::as_cluster), desired)
        }
        DesiredResource::User(user) => diff_user(user, actual.and_then(ActualResource::as_user)),
    };

    ChangeOperation {
        target: desired.id(),
        description: desired.description(),
        kind,
    }
}

fn diff_cluster(
    desired: &DesiredCluster,
    actual: Option<&ClusterState>,
    original: &DesiredResource,
) -> ChangeKind {
    let defer = |status| ChangeKind::Defer {
        status,
        desired: Box::new(original.clone()),
    };

    match (desired.state, actual) {
        (LifecycleState::Absent, None) => ChangeKind::NoOp,
        (LifecycleState::Absent, Some(current)) => match current.status {
            ProvisioningStatus::Deleting | ProvisioningStatus::Deleted => ChangeKind::NoOp,
            status if status.is_transitional() => defer(status),
            _ => ChangeKind::Delete,
        },
        (LifecycleState::Present, None) => ChangeKind::Create(CreatePayload::Cluster(desired.spec.clone())),
        (LifecycleState::Present, Some(current)) => match current.status {
            ProvisioningStatus::Deleted => {
                ChangeKind::Create(CreatePayload::Cluster(desired.spec.clone()))
            }
            // Cannot create under a name that is still being removed
            ProvisioningStatus::Deleting => defer(ProvisioningStatus::Deleting),
            status => {
                let update = cluster_changes(&desired.spec, current);
                if update.is_empty() {
                    ChangeKind::NoOp
                } else if status.is_transitional() {
                    defer(status)
                } else {
                    ChangeKind::Update(UpdatePayload::Cluster(update))
                }
            }
        },
    }
}

/// Field-level differences between a spec and the server view.
///
/// Create-time settings (shards, replication, region) are not compared.
pub fn cluster_changes(spec: &ClusterSpec, current: &ClusterState) -> ClusterUpdate {
    let mut update = ClusterUpdate::default();
    if spec.instance_size != current.instance_size {
        update.instance_size = Some(spec.instance_size);
    }
    if spec.encrypt != current.encrypt {
        update.encrypt = Some(spec.encrypt);
    }
    if spec.backup_enabled != current.backup_enabled {
        update.backup_enabled = Some(spec.backup_enabled);
    }
    if let Some(wanted) = spec.disk_size_gb {
        let differs = current
            .disk_size_gb
            .is_none_or(|have| (have - wanted).abs() > DISK_SIZE_EPSILON);
        if differs {
            update.disk_size_gb = Some(wanted);
        }
    }
    update
}

fn diff_user(desired: &DesiredUser, actual: Option<&UserState>) -> ChangeKind {
    match (desired.state, actual) {
        (LifecycleState::Absent, None) => ChangeKind::NoOp,
        (LifecycleState::Absent, Some(_)) => ChangeKind::Delete,
        (LifecycleState::Present, None) => {
            ChangeKind::Create(CreatePayload::User(desired.spec.clone()))
        }
        (LifecycleState::Present, Some(current)) => {
            let mut update = UserUpdate::default();
            if desired.spec.roles != current.roles {
                update.roles = Some(desired.spec.roles.clone());
            }
            // The server never returns passwords, so they are sent by
            // policy and never compared.
            if desired.update_password == PasswordPolicy::Always {
                update.password = desired.spec.password.clone();
            }

            if update.is_empty() {
                ChangeKind::NoOp
            } else {
                ChangeKind::Update(UpdatePayload::User(update))
            }
        }
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
    /// Number of resources waiting on a transitional status
    pub deferred: usize,
    /// Number of resources already in the desired state
    pub unchanged: usize,
}

impl DiffSummary {
    /// Create a summary from a list of operations
    pub fn from_operations<'a>(ops: impl IntoIterator<Item = &'a ChangeOperation>) -> Self {
        let mut summary = Self::default();
        for op in ops {
            match op.kind {
                ChangeKind::Create(_) => summary.additions += 1,
                ChangeKind::Delete => summary.removals += 1,
                ChangeKind::Update(_) => summary.modifications += 1,
                ChangeKind::Defer { .. } => summary.deferred += 1,
                ChangeKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.deferred
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlaskit::{DatabaseRole, InstanceSize, RoleSet, Secret};

    fn cluster(name: &str, size: InstanceSize) -> DesiredResource {
        DesiredCluster::present("g1", ClusterSpec::new(name, size)).into()
    }

    fn actual_cluster(name: &str, size: InstanceSize, status: ProvisioningStatus) -> ActualResource {
        ActualResource::Cluster(ClusterState::from_spec(&ClusterSpec::new(name, size), status))
    }

    fn app_user(policy: PasswordPolicy, password: &str) -> DesiredResource {
        DesiredUser::present(
            "g1",
            UserSpec::new("mongo_app_user")
                .role(DatabaseRole::global("readWrite"))
                .password(password),
        )
        .update_password(policy)
        .into()
    }

    fn actual_user(roles: &[&str]) -> ActualResource {
        ActualResource::User(UserState {
            username: "mongo_app_user".into(),
            roles: roles.iter().map(|r| DatabaseRole::global(*r)).collect(),
        })
    }

    #[test]
    fn test_absent_and_missing_is_noop() {
        let desired: DesiredResource =
            DesiredCluster::absent("g1", ClusterSpec::new("gone", InstanceSize::M10)).into();
        assert!(diff(&desired, None).is_noop());

        let desired: DesiredResource = DesiredUser::absent("g1", UserSpec::new("gone")).into();
        assert!(diff(&desired, None).is_noop());
    }

    #[test]
    fn test_absent_existing_is_delete() {
        let desired: DesiredResource =
            DesiredCluster::absent("g1", ClusterSpec::new("old", InstanceSize::M10)).into();
        let actual = actual_cluster("old", InstanceSize::M10, ProvisioningStatus::Idle);
        assert_eq!(diff(&desired, Some(&actual)).kind, ChangeKind::Delete);

        let deleting = actual_cluster("old", InstanceSize::M10, ProvisioningStatus::Deleting);
        assert!(diff(&desired, Some(&deleting)).is_noop());
    }

    #[test]
    fn test_absent_while_creating_defers() {
        let desired: DesiredResource =
            DesiredCluster::absent("g1", ClusterSpec::new("old", InstanceSize::M10)).into();
        let actual = actual_cluster("old", InstanceSize::M10, ProvisioningStatus::Creating);
        assert!(diff(&desired, Some(&actual)).is_deferred());
    }

    #[test]
    fn test_present_missing_is_full_create() {
        let desired = cluster("test-mongo", InstanceSize::M10);
        let op = diff(&desired, None);
        assert!(op.is_addition());
        match op.kind {
            ChangeKind::Create(CreatePayload::Cluster(spec)) => {
                assert_eq!(spec.name, "test-mongo");
                assert_eq!(spec.instance_size, InstanceSize::M10);
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_user_create_includes_password() {
        for policy in [PasswordPolicy::Always, PasswordPolicy::OnCreate] {
            let op = diff(&app_user(policy, "s3cret"), None);
            match op.kind {
                ChangeKind::Create(CreatePayload::User(spec)) => {
                    assert_eq!(spec.password, Some(Secret::new("s3cret")));
                }
                other => panic!("expected create, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_cluster_resize_updates_only_size() {
        let desired = cluster("prod-mongo", InstanceSize::M30);
        let actual = actual_cluster("prod-mongo", InstanceSize::M10, ProvisioningStatus::Idle);
        let op = diff(&desired, Some(&actual));
        assert!(op.is_modification());
        assert_eq!(
            op.kind,
            ChangeKind::Update(UpdatePayload::Cluster(ClusterUpdate {
                instance_size: Some(InstanceSize::M30),
                ..Default::default()
            }))
        );
        assert_eq!(op.changed_fields(), vec!["instance_size"]);
    }

    #[test]
    fn test_change_during_transition_defers() {
        let desired = cluster("prod-mongo", InstanceSize::M30);
        let actual = actual_cluster("prod-mongo", InstanceSize::M10, ProvisioningStatus::Updating);
        match diff(&desired, Some(&actual)).kind {
            ChangeKind::Defer { status, desired: pending } => {
                assert_eq!(status, ProvisioningStatus::Updating);
                assert_eq!(*pending, desired);
            }
            other => panic!("expected defer, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_cluster_is_noop_even_when_creating() {
        let desired = cluster("test-mongo", InstanceSize::M10);
        let actual = actual_cluster("test-mongo", InstanceSize::M10, ProvisioningStatus::Creating);
        assert!(diff(&desired, Some(&actual)).is_noop());
    }

    #[test]
    fn test_present_while_deleting_defers() {
        let desired = cluster("test-mongo", InstanceSize::M10);
        let actual = actual_cluster("test-mongo", InstanceSize::M10, ProvisioningStatus::Deleting);
        assert!(diff(&desired, Some(&actual)).is_deferred());
    }

    #[test]
    fn test_disk_size_compared_only_when_declared() {
        let mut state =
            ClusterState::from_spec(&ClusterSpec::new("c", InstanceSize::M10), ProvisioningStatus::Idle);
        state.disk_size_gb = Some(40.0);

        let spec = ClusterSpec::new("c", InstanceSize::M10);
        assert!(cluster_changes(&spec, &state).is_empty());

        let spec = ClusterSpec::new("c", InstanceSize::M10).disk_size_gb(40.0);
        assert!(cluster_changes(&spec, &state).is_empty());

        let spec = ClusterSpec::new("c", InstanceSize::M10).disk_size_gb(80.0);
        assert_eq!(cluster_changes(&spec, &state).disk_size_gb, Some(80.0));
    }

    #[test]
    fn test_encrypt_and_backup_changes() {
        let spec = ClusterSpec::new("c", InstanceSize::M10)
            .encrypt(true)
            .backup_enabled(false);
        let state = ClusterState::from_spec(&ClusterSpec::new("c", InstanceSize::M10), ProvisioningStatus::Idle);
        let update = cluster_changes(&spec, &state);
        assert_eq!(update.changed_fields(), vec!["encrypt", "backup_enabled"]);
    }

    #[test]
    fn test_on_create_never_resends_password() {
        let desired = app_user(PasswordPolicy::OnCreate, "changed-password");
        let actual = actual_user(&["read"]);
        match diff(&desired, Some(&actual)).kind {
            ChangeKind::Update(UpdatePayload::User(update)) => {
                assert!(update.roles.is_some());
                assert!(update.password.is_none());
            }
            other => panic!("expected update, got {other:?}"),
        }

        // Roles match: nothing to send at all
        let actual = actual_user(&["readWrite"]);
        assert!(diff(&desired, Some(&actual)).is_noop());
    }

    #[test]
    fn test_always_sends_password() {
        let desired = app_user(PasswordPolicy::Always, "s3cret");
        let actual = actual_user(&["readWrite"]);
        match diff(&desired, Some(&actual)).kind {
            ChangeKind::Update(UpdatePayload::User(update)) => {
                assert!(update.roles.is_none());
                assert_eq!(update.password, Some(Secret::new("s3cret")));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_role_order_is_irrelevant() {
        let roles: RoleSet = [DatabaseRole::global("read"), DatabaseRole::on("readWrite", "app")]
            .into_iter()
            .collect();
        let mut spec = UserSpec::new("mongo_app_user");
        spec.roles = roles;
        let desired: DesiredResource = DesiredUser::present("g1", spec)
            .update_password(PasswordPolicy::OnCreate)
            .into();
        let actual = ActualResource::User(UserState {
            username: "mongo_app_user".into(),
            roles: [DatabaseRole::on("readWrite", "app"), DatabaseRole::global("read")]
                .into_iter()
                .collect(),
        });
        assert!(diff(&desired, Some(&actual)).is_noop());
    }

    #[test]
    fn test_diff_is_idempotent() {
        let desired = cluster("prod-mongo", InstanceSize::M30);
        let actual = actual_cluster("prod-mongo", InstanceSize::M10, ProvisioningStatus::Idle);
        assert_eq!(diff(&desired, Some(&actual)), diff(&desired, Some(&actual)));

        let user = app_user(PasswordPolicy::Always, "pw");
        assert_eq!(diff(&user, None), diff(&user, None));
    }

    #[test]
    fn test_summary() {
        let ops = vec![
            diff(&cluster("a", InstanceSize::M10), None),
            diff(
                &cluster("b", InstanceSize::M30),
                Some(&actual_cluster("b", InstanceSize::M10, ProvisioningStatus::Idle)),
            ),
            diff(
                &cluster("c", InstanceSize::M10),
                Some(&actual_cluster("c", InstanceSize::M10, ProvisioningStatus::Idle)),
            ),
        ];
        let summary = DiffSummary::from_operations(&ops);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.total(), 2);
        assert!(summary.has_changes());
    }
}
