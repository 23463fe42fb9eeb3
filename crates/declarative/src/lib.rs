//! # Declarative
//!
//! Reconciliation engine for MongoDB Atlas clusters and database users.
//!
//! Resources are declared with a desired state, compared against what
//! Atlas reports, and converged by issuing the minimal API calls.
//!
//! ## Core Concepts
//!
//! - **DesiredResource / ActualResource**: what is declared vs. what exists
//! - **diff**: pure comparison yielding one [`ChangeOperation`] per resource
//! - **ExecutionPlan**: operations grouped into ordered phases
//! - **Registry**: per-run cache of observed state
//! - **Reconciler**: applies a plan with a bounded worker pool, polling
//!   asynchronous cluster operations to completion
//!
//! ## Example
//!
//! ```no_run
//! use atlaskit::{ClusterSpec, InstanceSize, MockBackend};
//! use declarative::{
//!     AutoConfirm, DesiredCluster, ExecuteOptions, NoProgress, Reconciler,
//! };
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MockBackend::new());
//! let reconciler = Reconciler::new(backend, ExecuteOptions::default());
//!
//! let desired = vec![
//!     DesiredCluster::present("group-id", ClusterSpec::new("test-mongo", InstanceSize::M10))
//!         .into(),
//! ];
//! let report = reconciler.reconcile(&desired, &NoProgress, &mut AutoConfirm)?;
//! assert!(report.is_success());
//! # Ok::<(), declarative::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`ProgressCallback`]: receives progress updates from worker threads
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This keeps the engine free of any particular terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod planner;
pub mod poll;
pub mod registry;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{
    ChangeKind, ChangeOperation, CreatePayload, DiffSummary, UpdatePayload, cluster_changes, diff,
};
pub use error::{Error, Result};
pub use executor::{Observation, Reconciler, declined};
pub use planner::{ExecutionPlan, Phase, PhaseKind};
pub use poll::{ClusterLifecycle, PollError, Poller};
pub use registry::Registry;
pub use resource::{ActualResource, DesiredCluster, DesiredResource, DesiredUser};
pub use types::{
    Action, ExecuteOptions, ExecuteSummary, FailureReason, LifecycleState, PasswordPolicy,
    ReconcileStatus, ReconciliationResult, ResourceId, ResourceKind, RunReport, SkipReason,
};
