//! # atlaskit
//!
//! Blocking client library for the MongoDB Atlas admin API.
//!
//! This crate provides:
//! - Typed models for clusters, database users and roles
//! - A [`Backend`](backend::Backend) trait with an HTTPS implementation
//!   (digest authentication) and an in-memory [`MockBackend`] for tests
//! - Error categories that tell retryable failures from fatal ones
//! - Retry with exponential backoff and cooperative cancellation
//!
//! ## Example
//!
//! ```no_run
//! use atlaskit::backend::Backend;
//! use atlaskit::backend::http::HttpBackend;
//! use atlaskit::credentials::{Credentials, StaticCredentials};
//! use atlaskit::{ClusterSpec, InstanceSize, RetryConfig};
//! use std::sync::Arc;
//!
//! let creds = StaticCredentials(Credentials::new("public-key", "private-key"));
//! let backend = HttpBackend::new(Arc::new(creds));
//!
//! let spec = ClusterSpec::new("test-mongo", InstanceSize::M10);
//! let created = atlaskit::with_retry(&RetryConfig::default(), None, None, || {
//!     backend.create_cluster("5f1a...", &spec)
//! })
//! .expect("create failed");
//! println!("{} is {}", created.name, created.status);
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod cancel;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::{Backend, MockBackend, MockCall, MockOp};
pub use cancel::CancelToken;
pub use credentials::{CredentialProvider, Credentials, StaticCredentials};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, RetryCallback, with_retry};
pub use types::{
    ADMIN_DATABASE, ClusterSpec, ClusterState, ClusterUpdate, DatabaseRole, InstanceSize,
    PollConfig, ProvisioningStatus, RetryConfig, RoleSet, Secret, UserSpec, UserState, UserUpdate,
};
