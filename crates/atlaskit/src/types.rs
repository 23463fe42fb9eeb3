//! Core types for Atlas clusters, database users and client behavior.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Database that unscoped roles and all database users live in.
pub const ADMIN_DATABASE: &str = "admin";

// =============================================================================
// Instance sizes
// =============================================================================

/// Atlas cluster tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceSize {
    M0,
    M2,
    M5,
    M10,
    M20,
    M30,
    M40,
    M50,
    M60,
    M80,
    M140,
    M200,
    M300,
    M400,
    M700,
}

impl InstanceSize {
    /// All known tiers, smallest first.
    pub const ALL: [InstanceSize; 15] = [
        Self::M0,
        Self::M2,
        Self::M5,
        Self::M10,
        Self::M20,
        Self::M30,
        Self::M40,
        Self::M50,
        Self::M60,
        Self::M80,
        Self::M140,
        Self::M200,
        Self::M300,
        Self::M400,
        Self::M700,
    ];

    /// Canonical Atlas name (`instanceSizeName`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M0 => "M0",
            Self::M2 => "M2",
            Self::M5 => "M5",
            Self::M10 => "M10",
            Self::M20 => "M20",
            Self::M30 => "M30",
            Self::M40 => "M40",
            Self::M50 => "M50",
            Self::M60 => "M60",
            Self::M80 => "M80",
            Self::M140 => "M140",
            Self::M200 => "M200",
            Self::M300 => "M300",
            Self::M400 => "M400",
            Self::M700 => "M700",
        }
    }
}

impl Default for InstanceSize {
    fn default() -> Self {
        Self::M10
    }
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .find(|size| size.as_str() == wanted)
            .copied()
            .ok_or_else(|| Error::Invalid(format!("unknown instance size '{s}'")))
    }
}

// =============================================================================
// Provisioning status
// =============================================================================

/// Provisioning status reported by Atlas for a cluster (`stateName`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Creating,
    Idle,
    Updating,
    Deleting,
    Deleted,
    Error,
}

impl ProvisioningStatus {
    /// Map an Atlas `stateName` to a status.
    ///
    /// `REPAIRING` is an in-progress operation from our point of view.
    /// Unknown names are treated as an error state.
    #[must_use]
    pub fn from_state_name(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "CREATING" => Self::Creating,
            "IDLE" => Self::Idle,
            "UPDATING" | "REPAIRING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "DELETED" => Self::Deleted,
            _ => Self::Error,
        }
    }

    /// An asynchronous operation is in progress.
    #[must_use]
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    /// No operation is in progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_transitional()
    }

    /// Lower-case name used in logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Idle => "idle",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Clusters
// =============================================================================

/// Desired configuration of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name, unique within a group
    pub name: String,
    /// Cluster tier
    pub instance_size: InstanceSize,
    /// Encrypt the provider volumes
    pub encrypt: bool,
    /// Continuous backups
    pub backup_enabled: bool,
    /// Number of shards (create only)
    pub num_shards: u32,
    /// Replica set members (create only)
    pub replication_factor: u32,
    /// Provider region (create only)
    pub region_name: String,
    /// Cloud provider (create only)
    pub provider: String,
    /// Disk size, compared only when declared
    pub disk_size_gb: Option<f64>,
    /// Provisioned IOPS (create only)
    pub disk_iops: Option<u32>,
}

impl ClusterSpec {
    /// Create a spec with the Atlas defaults used by the declarative modules.
    pub fn new(name: impl Into<String>, instance_size: InstanceSize) -> Self {
        Self {
            name: name.into(),
            instance_size,
            encrypt: false,
            backup_enabled: true,
            num_shards: 1,
            replication_factor: 3,
            region_name: "US_EAST_1".to_string(),
            provider: "AWS".to_string(),
            disk_size_gb: None,
            disk_iops: None,
        }
    }

    /// Set the encryption flag.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Set the backup flag.
    pub fn backup_enabled(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    /// Set the disk size.
    pub fn disk_size_gb(mut self, size: f64) -> Self {
        self.disk_size_gb = Some(size);
        self
    }
}

/// A cluster as last reported by Atlas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub name: String,
    pub instance_size: InstanceSize,
    pub encrypt: bool,
    pub backup_enabled: bool,
    pub num_shards: u32,
    pub replication_factor: u32,
    pub region_name: String,
    pub disk_size_gb: Option<f64>,
    /// Provisioning status
    pub status: ProvisioningStatus,
}

impl ClusterState {
    /// Server view of a freshly requested cluster in the given status.
    pub fn from_spec(spec: &ClusterSpec, status: ProvisioningStatus) -> Self {
        Self {
            name: spec.name.clone(),
            instance_size: spec.instance_size,
            encrypt: spec.encrypt,
            backup_enabled: spec.backup_enabled,
            num_shards: spec.num_shards,
            replication_factor: spec.replication_factor,
            region_name: spec.region_name.clone(),
            disk_size_gb: spec.disk_size_gb,
            status,
        }
    }

    /// Apply a partial update to this view.
    pub fn apply(&mut self, update: &ClusterUpdate) {
        if let Some(size) = update.instance_size {
            self.instance_size = size;
        }
        if let Some(encrypt) = update.encrypt {
            self.encrypt = encrypt;
        }
        if let Some(backup) = update.backup_enabled {
            self.backup_enabled = backup;
        }
        if let Some(disk) = update.disk_size_gb {
            self.disk_size_gb = Some(disk);
        }
    }
}

/// Changed cluster fields. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub instance_size: Option<InstanceSize>,
    pub encrypt: Option<bool>,
    pub backup_enabled: Option<bool>,
    pub disk_size_gb: Option<f64>,
}

impl ClusterUpdate {
    /// No field changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instance_size.is_none()
            && self.encrypt.is_none()
            && self.backup_enabled.is_none()
            && self.disk_size_gb.is_none()
    }

    /// Names of the changed fields, in a stable order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.instance_size.is_some() {
            fields.push("instance_size");
        }
        if self.encrypt.is_some() {
            fields.push("encrypt");
        }
        if self.backup_enabled.is_some() {
            fields.push("backup_enabled");
        }
        if self.disk_size_gb.is_some() {
            fields.push("disk_size_gb");
        }
        fields
    }
}

// =============================================================================
// Database users
// =============================================================================

/// A role granted on a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseRole {
    pub role_name: String,
    pub database_name: String,
}

impl DatabaseRole {
    /// A role scoped to the `admin` database.
    pub fn global(role: impl Into<String>) -> Self {
        Self {
            role_name: role.into(),
            database_name: ADMIN_DATABASE.to_string(),
        }
    }

    /// A role scoped to a specific database.
    pub fn on(role: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            role_name: role.into(),
            database_name: database.into(),
        }
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role_name, self.database_name)
    }
}

/// Order-irrelevant set of roles.
pub type RoleSet = BTreeSet<DatabaseRole>;

/// Write-only secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the plain value. Only call this when building a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Desired configuration of a database user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub username: String,
    pub roles: RoleSet,
    pub password: Option<Secret>,
}

impl UserSpec {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            roles: RoleSet::new(),
            password: None,
        }
    }

    /// Add a role.
    pub fn role(mut self, role: DatabaseRole) -> Self {
        self.roles.insert(role);
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password));
        self
    }
}

/// A database user as reported by Atlas. The password is never returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub username: String,
    pub roles: RoleSet,
}

/// Changed user fields. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub roles: Option<RoleSet>,
    pub password: Option<Secret>,
}

impl UserUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_none() && self.password.is_none()
    }

    /// Names of the changed fields, in a stable order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.roles.is_some() {
            fields.push("roles");
        }
        if self.password.is_some() {
            fields.push("password");
        }
        fields
    }
}

// =============================================================================
// Client behavior
// =============================================================================

/// Configuration for retry behavior on transient API errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// How to wait for asynchronous cluster operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between status checks
    pub interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}
