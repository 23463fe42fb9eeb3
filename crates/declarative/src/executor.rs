//! Convergence driver - applies a plan with a bounded worker pool
//!
//! Phases run one after another; inside a phase every operation targets a
//! distinct identity, so they run in parallel on a rayon pool of `jobs`
//! threads. Cluster operations are followed by polling until the cluster
//! reaches a terminal status.

use crate::context::{ConfirmCallback, ProgressCallback};
use crate::diff::{ChangeKind, ChangeOperation, CreatePayload, UpdatePayload, diff};
use crate::error::{Error, Result};
use crate::planner::ExecutionPlan;
use crate::poll::{PollError, Poller};
use crate::registry::Registry;
use crate::resource::{ActualResource, DesiredResource};
use crate::types::{
    Action, ExecuteOptions, FailureReason, ReconcileStatus, ReconciliationResult, ResourceId,
    ResourceKind, RunReport, SkipReason,
};
use atlaskit::{
    Backend, CancelToken, ClusterState, LogCallback, ProvisioningStatus, with_retry,
};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of fetching one declared resource
pub type Observation = atlaskit::Result<Option<ActualResource>>;

/// Drives declared resources toward their desired state.
pub struct Reconciler {
    backend: Arc<dyn Backend>,
    registry: Registry,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn Backend>, options: ExecuteOptions) -> Self {
        Self {
            backend,
            registry: Registry::new(),
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancel token, e.g. one wired to SIGINT.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))
    }

    /// Read one resource from the API, retrying transient failures.
    fn fetch(&self, id: &ResourceId) -> Observation {
        let label = format!("fetch {id}");
        let callback = LogCallback { label: &label };
        with_retry(
            &self.options.retry,
            Some(&callback),
            Some(&self.cancel),
            || match id.kind {
                ResourceKind::Cluster => Ok(self
                    .backend
                    .get_cluster(&id.group_id, &id.name)?
                    .map(ActualResource::Cluster)),
                ResourceKind::User => Ok(self
                    .backend
                    .get_user(&id.group_id, &id.name)?
                    .map(ActualResource::User)),
            },
        )
    }

    /// Fetch the actual state of every declared resource.
    ///
    /// Results line up with `desired`. Fetches go through the registry, so
    /// an identity is read at most once per run. An authentication failure
    /// aborts; any other failure is returned in its slot.
    pub fn observe(&self, desired: &[DesiredResource]) -> Result<Vec<Observation>> {
        let mut seen = HashSet::new();
        for resource in desired {
            let id = resource.id();
            if !seen.insert(id.clone()) {
                return Err(Error::DuplicateIdentity(id));
            }
        }

        let pool = self.pool()?;
        let fetched: Vec<Observation> = pool.install(|| {
            desired
                .par_iter()
                .map(|resource| {
                    let id = resource.id();
                    self.registry.get_or_fetch(&id, || self.fetch(&id))
                })
                .collect()
        });

        let mut observed = Vec::with_capacity(fetched.len());
        for observation in fetched {
            match observation {
                Err(e) if e.is_fatal_for_run() => return Err(Error::Unauthorized(e)),
                other => observed.push(other),
            }
        }
        Ok(observed)
    }

    /// Observe and compare every declared resource.
    pub fn plan(&self, desired: &[DesiredResource]) -> Result<ExecutionPlan> {
        let observed = self.observe(desired)?;

        let mut operations = Vec::with_capacity(desired.len());
        let mut failed = Vec::new();
        for (resource, observation) in desired.iter().zip(observed) {
            match observation {
                Ok(actual) => operations.push(diff(resource, actual.as_ref())),
                Err(e) => {
                    log::warn!("could not read {}: {e}", resource.id());
                    failed.push(ReconciliationResult::new(
                        resource.id(),
                        Action::Fetch,
                        ReconcileStatus::failed(FailureReason::from_error(&e)),
                    ));
                }
            }
        }

        let mut plan = ExecutionPlan::from_operations(operations)?;
        plan.set_order(desired.iter().map(DesiredResource::id));
        Ok(plan.with_failures(failed))
    }

    /// Apply a plan.
    ///
    /// Per-resource failures are reported in the returned report. `Err`
    /// means the run was aborted by an authentication failure; work already
    /// in flight is drained first.
    pub fn execute(
        &self,
        plan: &ExecutionPlan,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut results = baseline(plan);

        let run = Run::new(self, progress);
        if self.options.dry_run {
            results.extend(
                plan.changes()
                    .map(|op| unapplied(op, ReconcileStatus::skipped(SkipReason::DryRun))),
            );
        } else {
            let pool = self.pool()?;
            for phase in &plan.phases {
                progress.on_phase_start(phase.kind, phase.operations.len());
                let gated = phase.kind.is_user_phase();
                if gated {
                    run.open_gates(&phase.operations);
                }

                let phase_results: Vec<ReconciliationResult> = pool.install(|| {
                    phase
                        .operations
                        .par_iter()
                        .map(|op| {
                            let result = if gated {
                                run.run_gated(op)
                            } else {
                                run.run_op(op)
                            };
                            progress.on_resource_complete(&result);
                            result
                        })
                        .collect()
                });

                progress.on_phase_complete(phase.kind);
                results.extend(phase_results);
            }
        }

        results.sort_by_key(|r| plan.position(&r.id));
        if log::log_enabled!(log::Level::Trace) {
            for (id, actual) in self.registry.snapshot() {
                log::trace!("{id} after run: {:?}", actual.status());
            }
        }
        let report = RunReport {
            results,
            started_at,
            finished_at: Utc::now(),
        };
        match run.abort_error() {
            Some(source) => Err(Error::Aborted {
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    /// Plan, confirm and execute.
    ///
    /// Nothing is asked when the plan is empty or in dry-run mode.
    pub fn reconcile(
        &self,
        desired: &[DesiredResource],
        progress: &dyn ProgressCallback,
        confirm: &mut dyn ConfirmCallback,
    ) -> Result<RunReport> {
        let plan = self.plan(desired)?;

        if !self.options.dry_run && !plan.is_empty() {
            let prompt = format!("Apply {} change(s)?", plan.total_changes());
            let confirmed = confirm
                .confirm(&prompt)
                .map_err(|e| Error::Confirm(e.to_string()))?;
            if !confirmed {
                return Ok(declined(&plan));
            }
        }

        self.execute(&plan, progress)
    }
}

/// Results that exist before anything runs: fetch failures and no-ops.
fn baseline(plan: &ExecutionPlan) -> Vec<ReconciliationResult> {
    let mut results = plan.failed.clone();
    results.extend(plan.unchanged.iter().map(|op| {
        ReconciliationResult::new(
            op.target.clone(),
            Action::NoOp,
            ReconcileStatus::skipped(SkipReason::NoChange),
        )
    }));
    results
}

/// Report for a plan the user did not approve.
pub fn declined(plan: &ExecutionPlan) -> RunReport {
    let now = Utc::now();
    let mut results = baseline(plan);
    results.extend(
        plan.changes()
            .map(|op| unapplied(op, ReconcileStatus::skipped(SkipReason::Declined))),
    );
    results.sort_by_key(|r| plan.position(&r.id));
    RunReport {
        results,
        started_at: now,
        finished_at: now,
    }
}

fn changed_fields(op: &ChangeOperation) -> Vec<String> {
    op.changed_fields().into_iter().map(String::from).collect()
}

fn unapplied(op: &ChangeOperation, status: ReconcileStatus) -> ReconciliationResult {
    ReconciliationResult::new(op.target.clone(), op.action(), status).with_fields(changed_fields(op))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State of one `execute` call shared by the workers
struct Run<'a> {
    reconciler: &'a Reconciler,
    progress: &'a dyn ProgressCallback,
    /// First authentication failure
    abort: Mutex<Option<atlaskit::Error>>,
    /// Cluster that timed out, per group
    stuck: Mutex<HashMap<String, String>>,
    /// Whether user changes may proceed, per group
    gates: Mutex<HashMap<String, std::result::Result<(), FailureReason>>>,
}

impl<'a> Run<'a> {
    fn new(reconciler: &'a Reconciler, progress: &'a dyn ProgressCallback) -> Self {
        Self {
            reconciler,
            progress,
            abort: Mutex::new(None),
            stuck: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn abort_error(&self) -> Option<atlaskit::Error> {
        lock(&self.abort).take()
    }

    /// Map an API error, cancelling the run on authentication failure.
    fn api_error(&self, err: atlaskit::Error) -> FailureReason {
        let reason = FailureReason::from_error(&err);
        if err.is_fatal_for_run() {
            log::error!("{err}; stopping remaining work");
            lock(&self.abort).get_or_insert(err);
            self.reconciler.cancel.cancel();
        }
        reason
    }

    fn call<T>(
        &self,
        label: &str,
        operation: impl FnMut() -> atlaskit::Result<T>,
    ) -> atlaskit::Result<T> {
        let r = self.reconciler;
        let callback = LogCallback { label };
        with_retry(&r.options.retry, Some(&callback), Some(&r.cancel), operation)
    }

    /// Poll a cluster to a terminal status and record what was seen.
    fn wait(
        &self,
        id: &ResourceId,
        last: Option<ProvisioningStatus>,
    ) -> std::result::Result<Option<ClusterState>, FailureReason> {
        let r = self.reconciler;
        let poller = Poller::new(&*r.backend, &r.options.poll, &r.options.retry, &r.cancel);

        match poller.wait_terminal(&id.group_id, &id.name, last, &|status| {
            self.progress.on_status(id, status);
        }) {
            Ok(state) => {
                r.registry
                    .record(id.clone(), state.clone().map(ActualResource::Cluster));
                Ok(state)
            }
            Err(PollError::Api(e)) => Err(self.api_error(e)),
            Err(e) => {
                if matches!(e, PollError::Timeout { .. }) {
                    lock(&self.stuck)
                        .entry(id.group_id.clone())
                        .or_insert_with(|| id.name.clone());
                }
                log::warn!("{id}: {e}");
                Err(e.reason())
            }
        }
    }

    fn settle(
        &self,
        id: &ResourceId,
        last: ProvisioningStatus,
    ) -> std::result::Result<(), FailureReason> {
        match self.wait(id, Some(last))? {
            Some(cluster) if cluster.status == ProvisioningStatus::Error => {
                Err(FailureReason::RemoteError)
            }
            _ => Ok(()),
        }
    }

    /// Issue the API call for one operation and wait for it to finish.
    fn apply_change(&self, op: &ChangeOperation) -> std::result::Result<(), FailureReason> {
        let r = self.reconciler;
        let id = &op.target;
        let group = id.group_id.as_str();
        let name = id.name.as_str();
        let label = format!("{} {id}", op.action());
        let fail = |e: atlaskit::Error| self.api_error(e);

        match &op.kind {
            ChangeKind::NoOp => Ok(()),
            ChangeKind::Defer { status, .. } => Err(FailureReason::Conflict {
                message: format!("{id} is still {status}"),
            }),
            ChangeKind::Create(CreatePayload::Cluster(spec)) => {
                let created = self
                    .call(&label, || r.backend.create_cluster(group, spec))
                    .map_err(fail)?;
                r.registry.invalidate(id);
                self.settle(id, created.status)
            }
            ChangeKind::Update(UpdatePayload::Cluster(update)) => {
                let updated = self
                    .call(&label, || r.backend.update_cluster(group, name, update))
                    .map_err(fail)?;
                r.registry.invalidate(id);
                self.settle(id, updated.status)
            }
            ChangeKind::Create(CreatePayload::User(spec)) => {
                let user = self
                    .call(&label, || r.backend.create_user(group, spec))
                    .map_err(fail)?;
                r.registry.put(id.clone(), ActualResource::User(user));
                Ok(())
            }
            ChangeKind::Update(UpdatePayload::User(update)) => {
                let user = self
                    .call(&label, || r.backend.update_user(group, name, update))
                    .map_err(fail)?;
                r.registry.put(id.clone(), ActualResource::User(user));
                Ok(())
            }
            ChangeKind::Delete => {
                let deleted = self.call(&label, || match id.kind {
                    ResourceKind::Cluster => r.backend.delete_cluster(group, name),
                    ResourceKind::User => r.backend.delete_user(group, name),
                });
                match deleted {
                    Ok(()) => {}
                    Err(atlaskit::Error::NotFound { .. }) => {
                        log::info!("{id} is already gone");
                        r.registry.put_absent(id.clone());
                        return Ok(());
                    }
                    Err(e) => return Err(self.api_error(e)),
                }

                r.registry.invalidate(id);
                match id.kind {
                    ResourceKind::Cluster => self.settle(id, ProvisioningStatus::Deleting),
                    ResourceKind::User => {
                        r.registry.put_absent(id.clone());
                        Ok(())
                    }
                }
            }
        }
    }

    /// Wait out a transitional status and compare again.
    fn resolve_deferred(
        &self,
        id: &ResourceId,
        status: ProvisioningStatus,
        desired: &DesiredResource,
    ) -> std::result::Result<ChangeOperation, FailureReason> {
        // Only clusters have a provisioning status to wait out
        log::info!("{id} is {status}, waiting before applying changes");
        let actual = self.wait(id, Some(status))?.map(ActualResource::Cluster);

        if actual
            .as_ref()
            .is_some_and(|a| a.status() == Some(ProvisioningStatus::Error))
        {
            return Err(FailureReason::RemoteError);
        }

        let next = diff(desired, actual.as_ref());
        log::debug!("{id}: after waiting, {}", next.action());
        Ok(next)
    }

    fn run_op(&self, op: &ChangeOperation) -> ReconciliationResult {
        if self.reconciler.cancel.is_cancelled() {
            return unapplied(op, ReconcileStatus::skipped(SkipReason::Cancelled));
        }

        self.progress.on_resource_start(op);
        log::info!("{}: {}", op.action(), op.description);

        let (next, outcome) = match &op.kind {
            ChangeKind::Defer { status, desired } => {
                match self.resolve_deferred(&op.target, *status, desired) {
                    Ok(next) => {
                        let outcome = self.apply_change(&next);
                        (Some(next), outcome)
                    }
                    Err(reason) => (None, Err(reason)),
                }
            }
            _ => (None, self.apply_change(op)),
        };

        let applied = next.as_ref().unwrap_or(op);
        let status = match outcome {
            Ok(()) => {
                log::info!("{}: converged", op.target);
                ReconcileStatus::Converged
            }
            Err(reason) => {
                log::warn!("{}: {reason}", op.target);
                ReconcileStatus::failed(reason)
            }
        };
        ReconciliationResult::new(op.target.clone(), applied.action(), status)
            .with_fields(changed_fields(applied))
    }

    /// Wait for transitional clusters of every group touched by `ops`.
    fn open_gates(&self, ops: &[ChangeOperation]) {
        let groups: BTreeSet<&str> = ops.iter().map(|op| op.target.group_id.as_str()).collect();
        for group in groups {
            if lock(&self.gates).contains_key(group) {
                continue;
            }
            let gate = self.await_clusters(group);
            lock(&self.gates).insert(group.to_string(), gate);
        }
    }

    fn await_clusters(&self, group: &str) -> std::result::Result<(), FailureReason> {
        let r = self.reconciler;
        let stuck = lock(&self.stuck).get(group).cloned();
        if let Some(cluster) = stuck {
            return Err(FailureReason::Blocked { cluster });
        }
        if r.cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let pending = r
            .registry
            .clusters_in_group(group)
            .into_iter()
            .filter(|c| c.status.is_transitional());
        for cluster in pending {
            log::info!(
                "waiting for cluster {} ({}) before changing users",
                cluster.name,
                cluster.status
            );
            let id = ResourceId::cluster(group, &cluster.name);
            match self.wait(&id, Some(cluster.status)) {
                Ok(_) => {}
                Err(FailureReason::Cancelled) => return Err(FailureReason::Cancelled),
                Err(_) => {
                    return Err(FailureReason::Blocked {
                        cluster: cluster.name,
                    });
                }
            }
        }
        Ok(())
    }

    fn run_gated(&self, op: &ChangeOperation) -> ReconciliationResult {
        let gate = lock(&self.gates)
            .get(&op.target.group_id)
            .cloned()
            .unwrap_or(Ok(()));
        match gate {
            Ok(()) => self.run_op(op),
            Err(FailureReason::Cancelled) => {
                unapplied(op, ReconcileStatus::skipped(SkipReason::Cancelled))
            }
            Err(reason) => {
                log::warn!("{}: {reason}", op.target);
                unapplied(op, ReconcileStatus::failed(reason))
            }
        }
    }
}
