//! Errors that stop a reconciliation run as a whole.
//!
//! Failures of a single resource never end up here; they are reported as
//! [`crate::types::ReconcileStatus::Failed`] in that resource's result.

use crate::types::{ResourceId, RunReport};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Two declared resources share one identity
    #[error("{0} is declared more than once")]
    DuplicateIdentity(ResourceId),

    /// Credentials were rejected; nothing else can succeed
    #[error("authentication failed, run aborted")]
    Unauthorized(#[source] atlaskit::Error),

    /// Credentials were rejected while a plan was being applied.
    ///
    /// `report` holds the results of the work that ran before the abort.
    #[error("authentication failed, run aborted")]
    Aborted {
        #[source]
        source: atlaskit::Error,
        report: Box<RunReport>,
    },

    #[error("failed to create worker pool: {0}")]
    Pool(String),

    /// Asking for confirmation failed (not the same as declining)
    #[error("confirmation failed: {0}")]
    Confirm(String),
}

impl Error {
    /// Results gathered before the run was aborted, if any ran.
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            Self::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_messages() {
        let err = Error::DuplicateIdentity(ResourceId::cluster("g1", "test-mongo"));
        assert_eq!(
            err.to_string(),
            "cluster g1/test-mongo is declared more than once"
        );

        let err = Error::Unauthorized(atlaskit::Error::from_status(401, ""));
        assert!(err.source().is_some());
        assert!(err.partial_report().is_none());
    }
}
