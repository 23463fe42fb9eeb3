//! Progress and confirmation traits
//!
//! These traits let the engine report to and ask a front end without
//! depending on a particular terminal UI.

use crate::diff::ChangeOperation;
use crate::planner::PhaseKind;
use crate::types::{ReconciliationResult, ResourceId};
use anyhow::Result;
use atlaskit::ProvisioningStatus;

/// Progress callback for execution operations
///
/// Methods are called from worker threads, so implementations use
/// interior mutability.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts with `count` operations
    fn on_phase_start(&self, phase: PhaseKind, count: usize);

    /// Called when work on a single resource starts
    fn on_resource_start(&self, op: &ChangeOperation);

    /// Called for every polled cluster status
    fn on_status(&self, id: &ResourceId, status: ProvisioningStatus);

    /// Called when a resource has its final result
    fn on_resource_complete(&self, result: &ReconciliationResult);

    /// Called when a phase completes
    fn on_phase_complete(&self, phase: PhaseKind);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase_start(&self, _phase: PhaseKind, _count: usize) {}
    fn on_resource_start(&self, _op: &ChangeOperation) {}
    fn on_status(&self, _id: &ResourceId, _status: ProvisioningStatus) {}
    fn on_resource_complete(&self, _result: &ReconciliationResult) {}
    fn on_phase_complete(&self, _phase: PhaseKind) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
