//! Desired and actual resource model
//!
//! A [`DesiredResource`] is built per run from input specs. An
//! [`ActualResource`] is what Atlas last reported. Both are immutable
//! snapshots; the comparator in [`crate::diff`] is a pure function of the two.

use crate::types::{LifecycleState, PasswordPolicy, ResourceId, ResourceKind};
use atlaskit::{ClusterSpec, ClusterState, ProvisioningStatus, UserSpec, UserState};

/// A cluster as declared
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredCluster {
    pub group_id: String,
    pub spec: ClusterSpec,
    pub state: LifecycleState,
}

impl DesiredCluster {
    pub fn present(group_id: impl Into<String>, spec: ClusterSpec) -> Self {
        Self {
            group_id: group_id.into(),
            spec,
            state: LifecycleState::Present,
        }
    }

    pub fn absent(group_id: impl Into<String>, spec: ClusterSpec) -> Self {
        Self {
            group_id: group_id.into(),
            spec,
            state: LifecycleState::Absent,
        }
    }
}

/// A database user as declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredUser {
    pub group_id: String,
    pub spec: UserSpec,
    pub update_password: PasswordPolicy,
    pub state: LifecycleState,
}

impl DesiredUser {
    pub fn present(group_id: impl Into<String>, spec: UserSpec) -> Self {
        Self {
            group_id: group_id.into(),
            spec,
            update_password: PasswordPolicy::default(),
            state: LifecycleState::Present,
        }
    }

    pub fn absent(group_id: impl Into<String>, spec: UserSpec) -> Self {
        Self {
            group_id: group_id.into(),
            spec,
            update_password: PasswordPolicy::default(),
            state: LifecycleState::Absent,
        }
    }

    /// Set the password update policy.
    pub fn update_password(mut self, policy: PasswordPolicy) -> Self {
        self.update_password = policy;
        self
    }
}

/// Declared resource
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredResource {
    Cluster(DesiredCluster),
    User(DesiredUser),
}

impl DesiredResource {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Cluster(c) => ResourceId::cluster(&c.group_id, &c.spec.name),
            Self::User(u) => ResourceId::user(&u.group_id, &u.spec.username),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::User(_) => ResourceKind::User,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self {
            Self::Cluster(c) => c.state,
            Self::User(u) => u.state,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match (self, self.state()) {
            (Self::Cluster(c), LifecycleState::Present) => {
                format!("Cluster {} ({})", c.spec.name, c.spec.instance_size)
            }
            (Self::User(u), LifecycleState::Present) => format!("User {}", u.spec.username),
            (_, LifecycleState::Absent) => format!("Remove {} {}", self.kind(), self.id().name),
        }
    }
}

impl From<DesiredCluster> for DesiredResource {
    fn from(c: DesiredCluster) -> Self {
        Self::Cluster(c)
    }
}

impl From<DesiredUser> for DesiredResource {
    fn from(u: DesiredUser) -> Self {
        Self::User(u)
    }
}

/// Resource as last reported by Atlas
#[derive(Debug, Clone, PartialEq)]
pub enum ActualResource {
    Cluster(ClusterState),
    User(UserState),
}

impl ActualResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::User(_) => ResourceKind::User,
        }
    }

    /// Provisioning status; users have none.
    pub fn status(&self) -> Option<ProvisioningStatus> {
        match self {
            Self::Cluster(c) => Some(c.status),
            Self::User(_) => None,
        }
    }

    /// An asynchronous operation is in progress.
    pub fn is_transitional(&self) -> bool {
        self.status().is_some_and(|s| s.is_transitional())
    }

    pub fn as_cluster(&self) -> Option<&ClusterState> {
        match self {
            Self::Cluster(c) => Some(c),
            Self::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserState> {
        match self {
            Self::User(u) => Some(u),
            Self::Cluster(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlaskit::{DatabaseRole, InstanceSize, RoleSet};

    #[test]
    fn test_identity() {
        let cluster: DesiredResource =
            DesiredCluster::present("g1", ClusterSpec::new("test-mongo", InstanceSize::M10)).into();
        assert_eq!(cluster.id(), ResourceId::cluster("g1", "test-mongo"));
        assert_eq!(cluster.kind(), ResourceKind::Cluster);

        let user: DesiredResource = DesiredUser::present("g1", UserSpec::new("app")).into();
        assert_eq!(user.id(), ResourceId::user("g1", "app"));
    }

    #[test]
    fn test_description() {
        let cluster: DesiredResource =
            DesiredCluster::present("g1", ClusterSpec::new("test-mongo", InstanceSize::M10)).into();
        assert_eq!(cluster.description(), "Cluster test-mongo (M10)");

        let user: DesiredResource = DesiredUser::absent("g1", UserSpec::new("old")).into();
        assert_eq!(user.description(), "Remove user old");
    }

    #[test]
    fn test_actual_status() {
        let spec = ClusterSpec::new("c", InstanceSize::M10);
        let creating = ActualResource::Cluster(ClusterState::from_spec(
            &spec,
            ProvisioningStatus::Creating,
        ));
        assert!(creating.is_transitional());
        assert!(creating.as_user().is_none());

        let user = ActualResource::User(UserState {
            username: "app".into(),
            roles: RoleSet::from([DatabaseRole::global("read")]),
        });
        assert_eq!(user.status(), None);
        assert!(!user.is_transitional());
    }
}
