//! Backend trait and implementations for the Atlas admin API.
//!
//! This module provides the [`Backend`] trait and two implementations:
//! [`http::HttpBackend`] talks to Atlas over HTTPS, [`MockBackend`] keeps
//! everything in memory for tests.
//!
//! # Testing
//!
//! Use [`MockBackend`] for testing without network access:
//!
//! ```
//! use atlaskit::backend::{Backend, MockBackend};
//! use atlaskit::{ClusterSpec, InstanceSize, ProvisioningStatus};
//!
//! let mock = MockBackend::new();
//! let created = mock
//!     .create_cluster("g1", &ClusterSpec::new("test-mongo", InstanceSize::M10))
//!     .unwrap();
//! assert_eq!(created.status, ProvisioningStatus::Creating);
//! ```

pub mod http;

use crate::error::{Error, Result};
use crate::types::{
    ClusterSpec, ClusterState, ClusterUpdate, ProvisioningStatus, Secret, UserSpec, UserState,
    UserUpdate,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Boundary to the remote API.
///
/// Every call takes the group (project) id the resource lives in. `get_*`
/// return `Ok(None)` when the resource does not exist.
pub trait Backend: Send + Sync {
    /// Fetch a cluster.
    fn get_cluster(&self, group_id: &str, name: &str) -> Result<Option<ClusterState>>;

    /// Request a new cluster. Returns the server view, usually `creating`.
    fn create_cluster(&self, group_id: &str, spec: &ClusterSpec) -> Result<ClusterState>;

    /// Change fields of an existing cluster.
    fn update_cluster(
        &self,
        group_id: &str,
        name: &str,
        update: &ClusterUpdate,
    ) -> Result<ClusterState>;

    /// Request removal of a cluster.
    fn delete_cluster(&self, group_id: &str, name: &str) -> Result<()>;

    /// Fetch a database user.
    fn get_user(&self, group_id: &str, username: &str) -> Result<Option<UserState>>;

    /// Create a database user.
    fn create_user(&self, group_id: &str, spec: &UserSpec) -> Result<UserState>;

    /// Change roles and/or password of a database user.
    fn update_user(&self, group_id: &str, username: &str, update: &UserUpdate)
    -> Result<UserState>;

    /// Remove a database user.
    fn delete_user(&self, group_id: &str, username: &str) -> Result<()>;
}

// =============================================================================
// Mock backend
// =============================================================================

/// Backend operation, used to script failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GetCluster,
    CreateCluster,
    UpdateCluster,
    DeleteCluster,
    GetUser,
    CreateUser,
    UpdateUser,
    DeleteUser,
}

impl MockOp {
    /// Whether the operation changes remote state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::GetCluster | Self::GetUser)
    }
}

impl fmt::Display for MockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetCluster => "get_cluster",
            Self::CreateCluster => "create_cluster",
            Self::UpdateCluster => "update_cluster",
            Self::DeleteCluster => "delete_cluster",
            Self::GetUser => "get_user",
            Self::CreateUser => "create_user",
            Self::UpdateUser => "update_user",
            Self::DeleteUser => "delete_user",
        };
        f.write_str(name)
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,
    pub group_id: String,
    pub name: String,
}

#[derive(Debug)]
struct MockCluster {
    state: ClusterState,
    /// Polls that still report the transitional status
    polls_left: u32,
    /// Status reached once `polls_left` runs out
    settles_to: ProvisioningStatus,
}

#[derive(Debug)]
struct ScriptedFailure {
    status: u16,
    remaining: u32,
}

type Key = (String, String);

#[derive(Debug)]
struct MockState {
    clusters: HashMap<Key, MockCluster>,
    users: HashMap<Key, UserState>,
    passwords: HashMap<Key, Secret>,
    failures: HashMap<(MockOp, String), ScriptedFailure>,
    fail_next_settle: HashMap<Key, bool>,
    calls: Vec<MockCall>,
    polls_to_settle: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            clusters: HashMap::new(),
            users: HashMap::new(),
            passwords: HashMap::new(),
            failures: HashMap::new(),
            fail_next_settle: HashMap::new(),
            calls: Vec::new(),
            polls_to_settle: 1,
        }
    }
}

/// In-memory backend for testing without network access.
///
/// Clones share state, so a test can hand one clone to the engine and
/// inspect the other. Mutating cluster calls put the cluster into the
/// matching transitional status; it reaches its terminal status after
/// a configurable number of `get_cluster` polls.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

fn key(group_id: &str, name: &str) -> Key {
    (group_id.to_string(), name.to_string())
}

impl MockBackend {
    /// Create a new empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of polls a transitional cluster keeps reporting before it
    /// settles. Zero makes every operation complete immediately.
    pub fn set_polls_to_settle(&self, polls: u32) {
        self.lock().polls_to_settle = polls;
    }

    /// Seed an existing cluster.
    pub fn add_cluster(&self, group_id: &str, cluster: ClusterState) {
        let settles_to = settle_target(cluster.status);
        let mut state = self.lock();
        let polls_left = state.polls_to_settle;
        state.clusters.insert(
            key(group_id, &cluster.name),
            MockCluster {
                state: cluster,
                polls_left,
                settles_to,
            },
        );
    }

    /// Seed an existing user.
    pub fn add_user(&self, group_id: &str, user: UserState) {
        self.lock().users.insert(key(group_id, &user.username), user);
    }

    /// Fail the next `times` calls of `op` on `name` with an HTTP status.
    pub fn fail(&self, op: MockOp, name: &str, status: u16, times: u32) {
        self.lock().failures.insert(
            (op, name.to_string()),
            ScriptedFailure {
                status,
                remaining: times,
            },
        );
    }

    /// Keep a cluster in its current transitional status forever.
    pub fn stall(&self, group_id: &str, name: &str) {
        if let Some(cluster) = self.lock().clusters.get_mut(&key(group_id, name)) {
            cluster.polls_left = u32::MAX;
        }
    }

    /// Make the next operation on a cluster end in the `error` status.
    pub fn fail_provisioning(&self, group_id: &str, name: &str) {
        self.lock().fail_next_settle.insert(key(group_id, name), true);
    }

    /// Current cluster state without recording a call or advancing polls.
    #[must_use]
    pub fn cluster(&self, group_id: &str, name: &str) -> Option<ClusterState> {
        self.lock()
            .clusters
            .get(&key(group_id, name))
            .map(|c| c.state.clone())
    }

    /// Current user state without recording a call.
    #[must_use]
    pub fn user(&self, group_id: &str, username: &str) -> Option<UserState> {
        self.lock().users.get(&key(group_id, username)).cloned()
    }

    /// Last password set for a user.
    #[must_use]
    pub fn password(&self, group_id: &str, username: &str) -> Option<String> {
        self.lock()
            .passwords
            .get(&key(group_id, username))
            .map(|s| s.expose().to_string())
    }

    /// All recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls that change remote state, in order.
    #[must_use]
    pub fn mutations(&self) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record the call and return a scripted failure if one is pending.
    fn enter(state: &mut MockState, op: MockOp, group_id: &str, name: &str) -> Result<()> {
        state.calls.push(MockCall {
            op,
            group_id: group_id.to_string(),
            name: name.to_string(),
        });

        if let Some(failure) = state.failures.get_mut(&(op, name.to_string()))
            && failure.remaining > 0
        {
            failure.remaining -= 1;
            return Err(Error::from_status(failure.status, ""));
        }
        Ok(())
    }

    fn begin_transition(
        state: &mut MockState,
        group_id: &str,
        name: &str,
        status: ProvisioningStatus,
    ) {
        let polls = state.polls_to_settle;
        let fail = state
            .fail_next_settle
            .remove(&key(group_id, name))
            .unwrap_or(false);
        if let Some(cluster) = state.clusters.get_mut(&key(group_id, name)) {
            cluster.settles_to = if fail {
                ProvisioningStatus::Error
            } else {
                settle_target(status)
            };
            if polls == 0 {
                cluster.state.status = cluster.settles_to;
                cluster.polls_left = 0;
            } else {
                cluster.state.status = status;
                cluster.polls_left = polls;
            }
        }
    }
}

/// Terminal status a transitional status ends in.
fn settle_target(status: ProvisioningStatus) -> ProvisioningStatus {
    match status {
        ProvisioningStatus::Creating | ProvisioningStatus::Updating => ProvisioningStatus::Idle,
        ProvisioningStatus::Deleting => ProvisioningStatus::Deleted,
        other => other,
    }
}

fn not_found(group_id: &str, name: &str) -> Error {
    Error::NotFound {
        resource: format!("{group_id}/{name}"),
    }
}

impl Backend for MockBackend {
    fn get_cluster(&self, group_id: &str, name: &str) -> Result<Option<ClusterState>> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::GetCluster, group_id, name)?;

        let k = key(group_id, name);
        let Some(cluster) = state.clusters.get_mut(&k) else {
            return Ok(None);
        };

        if cluster.state.status.is_transitional() {
            if cluster.polls_left > 0 {
                if cluster.polls_left != u32::MAX {
                    cluster.polls_left -= 1;
                }
            } else {
                cluster.state.status = cluster.settles_to;
            }
        }

        // Deleted clusters disappear from the API
        if cluster.state.status == ProvisioningStatus::Deleted {
            state.clusters.remove(&k);
            return Ok(None);
        }
        Ok(Some(cluster.state.clone()))
    }

    fn create_cluster(&self, group_id: &str, spec: &ClusterSpec) -> Result<ClusterState> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::CreateCluster, group_id, &spec.name)?;

        let k = key(group_id, &spec.name);
        if state.clusters.contains_key(&k) {
            return Err(Error::Conflict {
                message: format!("a cluster named {} already exists", spec.name),
            });
        }

        state.clusters.insert(
            k,
            MockCluster {
                state: ClusterState::from_spec(spec, ProvisioningStatus::Creating),
                polls_left: 0,
                settles_to: ProvisioningStatus::Idle,
            },
        );
        Self::begin_transition(
            &mut state,
            group_id,
            &spec.name,
            ProvisioningStatus::Creating,
        );
        Ok(state.clusters[&key(group_id, &spec.name)].state.clone())
    }

    fn update_cluster(
        &self,
        group_id: &str,
        name: &str,
        update: &ClusterUpdate,
    ) -> Result<ClusterState> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::UpdateCluster, group_id, name)?;

        let k = key(group_id, name);
        let cluster = state
            .clusters
            .get_mut(&k)
            .ok_or_else(|| not_found(group_id, name))?;
        if cluster.state.status.is_transitional() {
            return Err(Error::Conflict {
                message: format!("cluster {name} is {}", cluster.state.status),
            });
        }
        cluster.state.apply(update);

        Self::begin_transition(&mut state, group_id, name, ProvisioningStatus::Updating);
        Ok(state.clusters[&k].state.clone())
    }

    fn delete_cluster(&self, group_id: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::DeleteCluster, group_id, name)?;

        if !state.clusters.contains_key(&key(group_id, name)) {
            return Err(not_found(group_id, name));
        }
        Self::begin_transition(&mut state, group_id, name, ProvisioningStatus::Deleting);
        Ok(())
    }

    fn get_user(&self, group_id: &str, username: &str) -> Result<Option<UserState>> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::GetUser, group_id, username)?;
        Ok(state.users.get(&key(group_id, username)).cloned())
    }

    fn create_user(&self, group_id: &str, spec: &UserSpec) -> Result<UserState> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::CreateUser, group_id, &spec.username)?;

        let k = key(group_id, &spec.username);
        if state.users.contains_key(&k) {
            return Err(Error::Conflict {
                message: format!("user {} already exists", spec.username),
            });
        }

        let user = UserState {
            username: spec.username.clone(),
            roles: spec.roles.clone(),
        };
        if let Some(password) = &spec.password {
            state.passwords.insert(k.clone(), password.clone());
        }
        state.users.insert(k, user.clone());
        Ok(user)
    }

    fn update_user(
        &self,
        group_id: &str,
        username: &str,
        update: &UserUpdate,
    ) -> Result<UserState> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::UpdateUser, group_id, username)?;

        let k = key(group_id, username);
        let user = state
            .users
            .get_mut(&k)
            .ok_or_else(|| not_found(group_id, username))?;
        if let Some(roles) = &update.roles {
            user.roles = roles.clone();
        }
        let user = user.clone();

        if let Some(password) = &update.password {
            state.passwords.insert(k, password.clone());
        }
        Ok(user)
    }

    fn delete_user(&self, group_id: &str, username: &str) -> Result<()> {
        let mut state = self.lock();
        Self::enter(&mut state, MockOp::DeleteUser, group_id, username)?;

        let k = key(group_id, username);
        if state.users.remove(&k).is_none() {
            return Err(not_found(group_id, username));
        }
        state.passwords.remove(&k);
        Ok(())
    }
}
