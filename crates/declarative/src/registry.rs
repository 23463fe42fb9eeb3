//! Resource registry
//!
//! In-memory record of the last observed state of every resource touched
//! during one run. It is never persisted. Known absence is recorded too, so
//! a resource that does not exist is not fetched twice.

use crate::resource::ActualResource;
use crate::types::{ResourceId, ResourceKind};
use atlaskit::ClusterState;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe map of identity to last observed state
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<ResourceId, Option<ActualResource>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceId, Option<ActualResource>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceId, Option<ActualResource>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Last observed state, `None` if absent or never observed.
    pub fn get(&self, id: &ResourceId) -> Option<ActualResource> {
        self.read().get(id).cloned().flatten()
    }

    /// Whether anything (presence or absence) is recorded for `id`.
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.read().contains_key(id)
    }

    /// Record an observed state.
    pub fn put(&self, id: ResourceId, actual: ActualResource) {
        self.write().insert(id, Some(actual));
    }

    /// Record that a resource does not exist.
    pub fn put_absent(&self, id: ResourceId) {
        self.write().insert(id, None);
    }

    /// Record the result of a fetch.
    pub fn record(&self, id: ResourceId, actual: Option<ActualResource>) {
        self.write().insert(id, actual);
    }

    /// Forget what is known about `id`.
    pub fn invalidate(&self, id: &ResourceId) {
        self.write().remove(id);
    }

    /// Return the recorded state, calling `fetch` only when nothing is recorded.
    pub fn get_or_fetch<E>(
        &self,
        id: &ResourceId,
        fetch: impl FnOnce() -> Result<Option<ActualResource>, E>,
    ) -> Result<Option<ActualResource>, E> {
        if let Some(known) = self.read().get(id) {
            return Ok(known.clone());
        }
        let fetched = fetch()?;
        self.record(id.clone(), fetched.clone());
        Ok(fetched)
    }

    /// Clusters of a group that are present, sorted by name.
    pub fn clusters_in_group(&self, group_id: &str) -> Vec<ClusterState> {
        let mut clusters: Vec<ClusterState> = self
            .read()
            .iter()
            .filter(|(id, _)| id.kind == ResourceKind::Cluster && id.group_id == group_id)
            .filter_map(|(_, actual)| actual.as_ref()?.as_cluster().cloned())
            .collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }

    /// Every present resource, sorted by identity.
    pub fn snapshot(&self) -> Vec<(ResourceId, ActualResource)> {
        let mut entries: Vec<(ResourceId, ActualResource)> = self
            .read()
            .iter()
            .filter_map(|(id, actual)| Some((id.clone(), actual.clone()?)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
