//! Cluster provisioning state machine and poller
//!
//! Cluster operations are asynchronous on the Atlas side: the API call
//! returns at once with a transitional status and the cluster settles
//! minutes later. All waiting goes through [`Poller`], which owns the
//! interval, the timeout and cancellation.

use crate::types::FailureReason;
use atlaskit::{
    Backend, CancelToken, ClusterState, LogCallback, PollConfig, ProvisioningStatus, RetryConfig,
    with_retry,
};
use std::fmt;
use std::time::{Duration, Instant};

/// Allowed status transitions of a cluster.
///
/// ```text
/// absent -> creating -> idle <-> updating -> (idle | error)
/// idle -> deleting -> deleted
/// ```
///
/// `error` is terminal for the run. `None` stands for a cluster the API
/// does not know.
pub struct ClusterLifecycle;

impl ClusterLifecycle {
    /// Whether Atlas is expected to move a cluster from `from` to `to`.
    pub fn allows(from: Option<ProvisioningStatus>, to: Option<ProvisioningStatus>) -> bool {
        use ProvisioningStatus::{Creating, Deleted, Deleting, Error, Idle, Updating};

        if from == to {
            return true;
        }
        matches!(
            (from, to),
            (None, Some(Creating))
                | (Some(Creating), Some(Idle | Error))
                | (Some(Idle), Some(Updating | Deleting))
                | (Some(Updating), Some(Idle | Error))
                | (Some(Deleting), Some(Deleted) | None)
                | (Some(Deleted), None)
        )
    }
}

/// Why waiting for a terminal status stopped early
#[derive(Debug)]
pub enum PollError {
    /// The timeout elapsed while the cluster was still transitional
    Timeout { waited: Duration },
    /// The cancel token fired
    Cancelled,
    /// Reading the cluster failed after retries
    Api(atlaskit::Error),
}

impl PollError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Timeout { .. } => FailureReason::Timeout,
            Self::Cancelled => FailureReason::Cancelled,
            Self::Api(e) => FailureReason::from_error(e),
        }
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { waited } => write!(f, "still transitional after {}s", waited.as_secs()),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Api(e) => write!(f, "{e}"),
        }
    }
}

/// Polls a cluster until it reaches a terminal status.
pub struct Poller<'a> {
    backend: &'a dyn Backend,
    poll: &'a PollConfig,
    retry: &'a RetryConfig,
    cancel: &'a CancelToken,
}

impl<'a> Poller<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        poll: &'a PollConfig,
        retry: &'a RetryConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            backend,
            poll,
            retry,
            cancel,
        }
    }

    /// Wait until the cluster is idle, deleted, in error, or gone.
    ///
    /// `last` is the status reported by the call that started the
    /// operation. Returns the final server view, `None` if the cluster no
    /// longer exists. `on_status` sees every polled status.
    pub fn wait_terminal(
        &self,
        group_id: &str,
        name: &str,
        mut last: Option<ProvisioningStatus>,
        on_status: &dyn Fn(ProvisioningStatus),
    ) -> Result<Option<ClusterState>, PollError> {
        let started = Instant::now();
        let label = format!("poll cluster {name}");
        let callback = LogCallback { label: &label };

        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let current = with_retry(self.retry, Some(&callback), Some(self.cancel), || {
                self.backend.get_cluster(group_id, name)
            })
            .map_err(|e| match e {
                atlaskit::Error::Cancelled => PollError::Cancelled,
                other => PollError::Api(other),
            })?;

            let status = current.as_ref().map(|c| c.status);
            if !ClusterLifecycle::allows(last, status) {
                log::warn!(
                    "cluster {name}: unexpected transition {} -> {}",
                    describe(last),
                    describe(status)
                );
            }
            last = status;

            let Some(cluster) = current else {
                log::debug!("cluster {name} no longer exists");
                return Ok(None);
            };
            on_status(cluster.status);

            if cluster.status.is_terminal() {
                log::debug!(
                    "cluster {name} reached {} after {}s",
                    cluster.status,
                    started.elapsed().as_secs()
                );
                return Ok(Some(cluster));
            }

            let waited = started.elapsed();
            if waited >= self.poll.timeout {
                return Err(PollError::Timeout { waited });
            }

            let pause = self.poll.interval.min(self.poll.timeout - waited);
            log::trace!("cluster {name} is {}, next poll in {pause:?}", cluster.status);
            if self.cancel.sleep(pause) {
                return Err(PollError::Cancelled);
            }
        }
    }
}

fn describe(status: Option<ProvisioningStatus>) -> &'static str {
    status.map_or("absent", |s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlaskit::{ClusterSpec, InstanceSize, MockBackend, MockOp};
    use std::sync::Mutex;

    fn fast_poll() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(500))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), 1.0)
    }

    #[test]
    fn test_lifecycle_table() {
        use ProvisioningStatus::*;

        assert!(ClusterLifecycle::allows(None, Some(Creating)));
        assert!(ClusterLifecycle::allows(Some(Creating), Some(Idle)));
        assert!(ClusterLifecycle::allows(Some(Idle), Some(Updating)));
        assert!(ClusterLifecycle::allows(Some(Updating), Some(Idle)));
        assert!(ClusterLifecycle::allows(Some(Updating), Some(Error)));
        assert!(ClusterLifecycle::allows(Some(Idle), Some(Deleting)));
        assert!(ClusterLifecycle::allows(Some(Deleting), None));
        assert!(ClusterLifecycle::allows(Some(Creating), Some(Creating)));

        // error is never retried into creating
        assert!(!ClusterLifecycle::allows(Some(Error), Some(Creating)));
        assert!(!ClusterLifecycle::allows(None, Some(Idle)));
        assert!(!ClusterLifecycle::allows(Some(Deleted), Some(Creating)));
    }

    #[test]
    fn test_wait_until_idle() {
        let mock = MockBackend::new();
        mock.set_polls_to_settle(2);
        mock.create_cluster("g1", &ClusterSpec::new("test-mongo", InstanceSize::M10))
            .unwrap();

        let (poll, retry, cancel) = (fast_poll(), fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let seen = Mutex::new(Vec::new());
        let state = poller
            .wait_terminal("g1", "test-mongo", Some(ProvisioningStatus::Creating), &|s| {
                seen.lock().unwrap().push(s);
            })
            .unwrap()
            .unwrap();

        assert_eq!(state.status, ProvisioningStatus::Idle);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProvisioningStatus::Creating,
                ProvisioningStatus::Creating,
                ProvisioningStatus::Idle
            ]
        );
    }

    #[test]
    fn test_delete_ends_when_gone() {
        let mock = MockBackend::new();
        mock.add_cluster(
            "g1",
            ClusterState::from_spec(
                &ClusterSpec::new("old", InstanceSize::M10),
                ProvisioningStatus::Idle,
            ),
        );
        mock.delete_cluster("g1", "old").unwrap();

        let (poll, retry, cancel) = (fast_poll(), fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let result = poller
            .wait_terminal("g1", "old", Some(ProvisioningStatus::Deleting), &|_| {})
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_error_status_is_returned() {
        let mock = MockBackend::new();
        mock.fail_provisioning("g1", "bad");
        mock.create_cluster("g1", &ClusterSpec::new("bad", InstanceSize::M10))
            .unwrap();

        let (poll, retry, cancel) = (fast_poll(), fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let state = poller
            .wait_terminal("g1", "bad", Some(ProvisioningStatus::Creating), &|_| {})
            .unwrap()
            .unwrap();
        assert_eq!(state.status, ProvisioningStatus::Error);
    }

    #[test]
    fn test_timeout() {
        let mock = MockBackend::new();
        mock.create_cluster("g1", &ClusterSpec::new("slow", InstanceSize::M10))
            .unwrap();
        mock.stall("g1", "slow");

        let poll = PollConfig::new(Duration::from_millis(2), Duration::from_millis(20));
        let (retry, cancel) = (fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let err = poller
            .wait_terminal("g1", "slow", Some(ProvisioningStatus::Creating), &|_| {})
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
        assert_eq!(err.reason(), FailureReason::Timeout);
    }

    #[test]
    fn test_cancelled_wait() {
        let mock = MockBackend::new();
        mock.create_cluster("g1", &ClusterSpec::new("slow", InstanceSize::M10))
            .unwrap();
        mock.stall("g1", "slow");

        let poll = PollConfig::new(Duration::from_secs(30), Duration::from_secs(600));
        let (retry, cancel) = (fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);

        let canceller = cancel.clone();
        let err = poller
            .wait_terminal("g1", "slow", Some(ProvisioningStatus::Creating), &|_| {
                canceller.cancel();
            })
            .unwrap_err();
        assert!(matches!(err, PollError::Cancelled));
        assert_eq!(err.reason(), FailureReason::Cancelled);
    }

    #[test]
    fn test_transient_poll_errors_are_retried() {
        let mock = MockBackend::new();
        mock.set_polls_to_settle(0);
        mock.create_cluster("g1", &ClusterSpec::new("c", InstanceSize::M10))
            .unwrap();
        mock.fail(MockOp::GetCluster, "c", 503, 2);

        let (poll, retry, cancel) = (fast_poll(), fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let state = poller
            .wait_terminal("g1", "c", Some(ProvisioningStatus::Idle), &|_| {})
            .unwrap();
        assert!(state.is_some());
    }

    #[test]
    fn test_unauthorized_poll_is_fatal() {
        let mock = MockBackend::new();
        mock.fail(MockOp::GetCluster, "c", 401, 1);

        let (poll, retry, cancel) = (fast_poll(), fast_retry(), CancelToken::new());
        let poller = Poller::new(&mock, &poll, &retry, &cancel);
        let err = poller
            .wait_terminal("g1", "c", None, &|_| {})
            .unwrap_err();
        assert!(matches!(err, PollError::Api(ref e) if e.is_fatal_for_run()));
    }
}
