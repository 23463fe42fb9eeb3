//! Playbook file: the declared clusters and users
//!
//! ```toml
//! group_id = "abcabcabc123123123"
//!
//! [[clusters]]
//! name = "test-mongo"
//! instance_size = "M10"
//!
//! [[users]]
//! user = "mongo_app_user"
//! password_env = "MONGO_APP_PASSWORD"
//! roles = ["readWrite", { db = "app", role = "read" }]
//! ```
//!
//! Everything is checked before any API call. A playbook with a single
//! problem is rejected as a whole.

use anyhow::{Context, Result};
use atlaskit::{ClusterSpec, DatabaseRole, InstanceSize, UserSpec};
use declarative::{
    DesiredCluster, DesiredResource, DesiredUser, LifecycleState, PasswordPolicy, ResourceId,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static CLUSTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,63}$").expect("cluster name regex is valid")
});

// Usernames become a URL path segment, so `.` and `..` are ruled out.
static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_@+=-][A-Za-z0-9._@+=-]*$").expect("username regex is valid")
});

/// Built-in Atlas roles accepted in `roles`
pub const BUILTIN_ROLES: &[&str] = &[
    "atlasAdmin",
    "readWriteAnyDatabase",
    "readAnyDatabase",
    "clusterMonitor",
    "backup",
    "dbAdminAnyDatabase",
    "enableSharding",
    "read",
    "readWrite",
    "dbAdmin",
];

const REPLICATION_FACTORS: &[u32] = &[3, 5, 7];

// ============================================================================
// File Schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Playbook {
    /// Group used by entries that do not name one
    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,

    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default = "default_instance_size")]
    pub instance_size: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    #[serde(default)]
    pub state: LifecycleState,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    #[serde(default = "default_region")]
    pub region_name: String,
    #[serde(default)]
    pub disk_size_gb: Option<f64>,
    #[serde(default)]
    pub disk_iops: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub user: String,
    #[serde(default)]
    pub password: Option<PlainPassword>,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub update_password: PasswordPolicy,
    #[serde(default)]
    pub roles: Vec<RoleEntry>,
    #[serde(default)]
    pub state: LifecycleState,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// A role as written: `"readWrite"` (on `admin`) or `{ db, role }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RoleEntry {
    Global(String),
    Scoped { db: String, role: String },
}

impl RoleEntry {
    fn name(&self) -> &str {
        match self {
            Self::Global(role) | Self::Scoped { role, .. } => role,
        }
    }

    fn to_role(&self) -> DatabaseRole {
        match self {
            Self::Global(role) => DatabaseRole::global(role),
            Self::Scoped { db, role } => DatabaseRole::on(role, db),
        }
    }
}

/// Password written in the playbook. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct PlainPassword(String);

impl fmt::Debug for PlainPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

fn default_instance_size() -> String {
    InstanceSize::default().to_string()
}

fn default_true() -> bool {
    true
}

fn default_num_shards() -> u32 {
    1
}

fn default_replication_factor() -> u32 {
    3
}

fn default_region() -> String {
    "US_EAST_1".to_string()
}

// ============================================================================
// Validation
// ============================================================================

/// Every problem found in a playbook
#[derive(Debug, thiserror::Error)]
#[error("playbook has {} problem(s):\n  - {}", .issues.len(), .issues.join("\n  - "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

impl Playbook {
    /// Load a playbook file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid playbook {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format")
    }

    /// Number of declared resources
    pub fn len(&self) -> usize {
        self.clusters.len() + self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate and build the declared resources.
    ///
    /// `default_group` is the group of the credentials, used when neither
    /// the entry nor the playbook names one. Passwords given through
    /// `password_env` are read here.
    pub fn resolve(
        &self,
        default_group: Option<&str>,
    ) -> std::result::Result<Vec<DesiredResource>, ValidationError> {
        let mut issues = Vec::new();
        let mut resources: Vec<DesiredResource> = Vec::with_capacity(self.len());

        for entry in &self.clusters {
            match self.resolve_cluster(entry, default_group) {
                Ok(cluster) => resources.push(cluster.into()),
                Err(mut found) => issues.append(&mut found),
            }
        }
        for entry in &self.users {
            match self.resolve_user(entry, default_group) {
                Ok(user) => resources.push(user.into()),
                Err(mut found) => issues.append(&mut found),
            }
        }

        let mut seen: HashSet<ResourceId> = HashSet::new();
        for resource in &resources {
            let id = resource.id();
            if !seen.insert(id.clone()) {
                issues.push(format!("{id} is declared more than once"));
            }
        }

        if issues.is_empty() {
            Ok(resources)
        } else {
            Err(ValidationError { issues })
        }
    }

    fn group_for(&self, own: Option<&String>, default_group: Option<&str>) -> Option<String> {
        own.or(self.group_id.as_ref())
            .map(String::as_str)
            .or(default_group)
            .filter(|g| !g.is_empty())
            .map(String::from)
    }

    fn resolve_cluster(
        &self,
        entry: &ClusterEntry,
        default_group: Option<&str>,
    ) -> std::result::Result<DesiredCluster, Vec<String>> {
        let label = format!("cluster '{}'", entry.name);
        let mut issues = Vec::new();

        if !CLUSTER_NAME.is_match(&entry.name) {
            issues.push(format!(
                "{label}: name must start with a letter or digit and contain only letters, digits and '-' (max 64)"
            ));
        }
        let size = entry
            .instance_size
            .parse::<InstanceSize>()
            .map_err(|e| issues.push(format!("{label}: {e}")))
            .ok();
        if entry.num_shards < 1 {
            issues.push(format!("{label}: num_shards must be at least 1"));
        }
        if !REPLICATION_FACTORS.contains(&entry.replication_factor) {
            issues.push(format!(
                "{label}: replication_factor must be 3, 5 or 7 (got {})",
                entry.replication_factor
            ));
        }
        if let Some(disk) = entry.disk_size_gb
            && !(disk.is_finite() && disk > 0.0)
        {
            issues.push(format!("{label}: disk_size_gb must be positive"));
        }
        let group = self.group_for(entry.group_id.as_ref(), default_group);
        if group.is_none() {
            issues.push(format!("{label}: no group_id"));
        }

        let (Some(size), Some(group), true) = (size, group, issues.is_empty()) else {
            return Err(issues);
        };

        let mut spec = ClusterSpec::new(&entry.name, size)
            .encrypt(entry.encrypt)
            .backup_enabled(entry.backup_enabled);
        spec.num_shards = entry.num_shards;
        spec.replication_factor = entry.replication_factor;
        spec.region_name = entry.region_name.clone();
        spec.disk_size_gb = entry.disk_size_gb;
        spec.disk_iops = entry.disk_iops;

        Ok(DesiredCluster {
            group_id: group,
            spec,
            state: entry.state,
        })
    }

    fn resolve_user(
        &self,
        entry: &UserEntry,
        default_group: Option<&str>,
    ) -> std::result::Result<DesiredUser, Vec<String>> {
        let label = format!("user '{}'", entry.user);
        let mut issues = Vec::new();

        if entry.user.is_empty() {
            issues.push("user: name cannot be empty".to_string());
        } else if !USERNAME.is_match(&entry.user) {
            issues.push(format!(
                "{label}: name may only use letters, digits and . _ @ + = - (not leading '.')"
            ));
        }
        for role in &entry.roles {
            if !BUILTIN_ROLES.contains(&role.name()) {
                issues.push(format!("{label}: unknown role '{}'", role.name()));
            }
            if let RoleEntry::Scoped { db, .. } = role
                && db.is_empty()
            {
                issues.push(format!("{label}: role '{}' has an empty db", role.name()));
            }
        }
        if entry.password.is_some() && entry.password_env.is_some() {
            issues.push(format!("{label}: set either password or password_env"));
        }
        let password = match self.password_for(entry) {
            Ok(password) => password,
            Err(issue) => {
                issues.push(format!("{label}: {issue}"));
                None
            }
        };
        if entry.state == LifecycleState::Present && password.is_none() && issues.is_empty() {
            issues.push(format!("{label}: a password is required"));
        }
        let group = self.group_for(entry.group_id.as_ref(), default_group);
        if group.is_none() {
            issues.push(format!("{label}: no group_id"));
        }

        let Some(group) = group.filter(|_| issues.is_empty()) else {
            return Err(issues);
        };

        let mut spec = UserSpec::new(&entry.user);
        for role in &entry.roles {
            spec = spec.role(role.to_role());
        }
        if let Some(password) = password {
            spec = spec.password(password);
        }

        Ok(DesiredUser {
            group_id: group,
            spec,
            update_password: entry.update_password,
            state: entry.state,
        })
    }

    /// Declared password, if any. Absent users never need one.
    fn password_for(&self, entry: &UserEntry) -> std::result::Result<Option<String>, String> {
        if entry.state == LifecycleState::Absent {
            return Ok(None);
        }
        if let Some(password) = &entry.password {
            return Ok(Some(password.0.clone()).filter(|p| !p.is_empty()));
        }
        match &entry.password_env {
            Some(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(Some(value)),
                _ => Err(format!("password_env {var} is not set")),
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::{env_lock, with_env_var, without_env_var};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
group_id = "g1"

[[clusters]]
name = "test-mongo"

[[clusters]]
name = "analytics"
instance_size = "m30"
encrypt = true
backup_enabled = false
group_id = "g2"
num_shards = 2
replication_factor = 5
region_name = "EU_WEST_1"
disk_size_gb = 40.0
disk_iops = 3000

[[users]]
user = "mongo_app_user"
password = "hunter22"
update_password = "on_create"
roles = ["readWrite", { db = "app", role = "read" }]

[[users]]
user = "old_user"
state = "absent"
"#;

    fn issues(toml: &str, default_group: Option<&str>) -> Vec<String> {
        Playbook::parse(toml)
            .unwrap()
            .resolve(default_group)
            .unwrap_err()
            .issues
    }

    #[test]
    fn test_full_playbook() {
        let resources = Playbook::parse(FULL).unwrap().resolve(None).unwrap();
        assert_eq!(resources.len(), 4);

        let DesiredResource::Cluster(first) = &resources[0] else {
            panic!("expected cluster");
        };
        assert_eq!(first.group_id, "g1");
        assert_eq!(first.spec.instance_size, InstanceSize::M10);
        assert!(first.spec.backup_enabled);
        assert!(!first.spec.encrypt);
        assert_eq!(first.spec.replication_factor, 3);

        let DesiredResource::Cluster(second) = &resources[1] else {
            panic!("expected cluster");
        };
        assert_eq!(second.group_id, "g2");
        assert_eq!(second.spec.instance_size, InstanceSize::M30);
        assert!(second.spec.encrypt);
        assert_eq!(second.spec.num_shards, 2);
        assert_eq!(second.spec.region_name, "EU_WEST_1");
        assert_eq!(second.spec.disk_iops, Some(3000));

        let DesiredResource::User(user) = &resources[2] else {
            panic!("expected user");
        };
        assert_eq!(user.update_password, PasswordPolicy::OnCreate);
        assert_eq!(
            user.spec.password.as_ref().map(atlaskit::Secret::expose),
            Some("hunter22")
        );
        assert!(user.spec.roles.contains(&DatabaseRole::global("readWrite")));
        assert!(user.spec.roles.contains(&DatabaseRole::on("read", "app")));

        let DesiredResource::User(old) = &resources[3] else {
            panic!("expected user");
        };
        assert_eq!(old.state, LifecycleState::Absent);
        assert_eq!(old.update_password, PasswordPolicy::Always);
        assert!(old.spec.password.is_none());
    }

    #[test]
    fn test_debug_hides_password() {
        let playbook = Playbook::parse(FULL).unwrap();
        assert!(!format!("{playbook:?}").contains("hunter22"));
    }

    #[test]
    fn test_group_falls_back_to_credentials() {
        let toml = "[[clusters]]\nname = \"c1\"";
        let resources = Playbook::parse(toml).unwrap().resolve(Some("cg")).unwrap();
        assert_eq!(resources[0].id(), ResourceId::cluster("cg", "c1"));

        let found = issues(toml, None);
        assert_eq!(found, vec!["cluster 'c1': no group_id".to_string()]);
    }

    #[test]
    fn test_cluster_rules() {
        let toml = r#"
group_id = "g1"

[[clusters]]
name = "-bad"

[[clusters]]
name = "ok"
instance_size = "M11"

[[clusters]]
name = "shards"
num_shards = 0
replication_factor = 4
"#;
        let found = issues(toml, None);
        assert_eq!(found.len(), 4);
        assert!(found[0].contains("cluster '-bad'"));
        assert!(found[1].contains("unknown instance size 'M11'"));
        assert!(found[2].contains("num_shards"));
        assert!(found[3].contains("replication_factor must be 3, 5 or 7 (got 4)"));
    }

    #[test]
    fn test_long_cluster_name() {
        let name = "a".repeat(65);
        let toml = format!("group_id = \"g\"\n[[clusters]]\nname = \"{name}\"");
        assert_eq!(issues(&toml, None).len(), 1);

        let ok = format!("group_id = \"g\"\n[[clusters]]\nname = \"{}\"", "a".repeat(64));
        assert!(Playbook::parse(&ok).unwrap().resolve(None).is_ok());
    }

    #[test]
    fn test_user_rules() {
        let toml = r#"
group_id = "g1"

[[users]]
user = "a/b"
password = "x"

[[users]]
user = "nopass"

[[users]]
user = "badrole"
password = "x"
roles = ["root"]
"#;
        let found = issues(toml, None);
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("user 'a/b': name may only use"));
        assert_eq!(found[1], "user 'nopass': a password is required");
        assert_eq!(found[2], "user 'badrole': unknown role 'root'");
    }

    #[test]
    fn test_usernames_must_be_path_safe() {
        for name in ["svc?x=1", "ops#1", "50%", "..", ".hidden", "two words"] {
            let toml = format!(
                "group_id = \"g1\"\n[[users]]\nuser = \"{name}\"\nstate = \"absent\"\n"
            );
            let found = issues(&toml, None);
            assert_eq!(found.len(), 1, "{name}");
            assert!(found[0].contains("name may only use"), "{name}");
        }

        let toml = r#"
group_id = "g1"

[[users]]
user = "ops.team@example.com"
state = "absent"

[[users]]
user = "svc_app-1+ro"
state = "absent"
"#;
        assert!(Playbook::parse(toml).unwrap().resolve(None).is_ok());
    }

    #[test]
    fn test_password_env() {
        let _lock = env_lock();
        let toml = r#"
group_id = "g1"

[[users]]
user = "app"
password_env = "ATLAS_RECONCILE_TEST_PASSWORD"
"#;
        with_env_var("ATLAS_RECONCILE_TEST_PASSWORD", "from-env", || {
            let resources = Playbook::parse(toml).unwrap().resolve(None).unwrap();
            let DesiredResource::User(user) = &resources[0] else {
                panic!("expected user");
            };
            assert_eq!(
                user.spec.password.as_ref().map(atlaskit::Secret::expose),
                Some("from-env")
            );
        });

        without_env_var("ATLAS_RECONCILE_TEST_PASSWORD", || {
            let found = issues(toml, None);
            assert_eq!(
                found,
                vec!["user 'app': password_env ATLAS_RECONCILE_TEST_PASSWORD is not set".to_string()]
            );
        });
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let toml = r#"
[[clusters]]
name = "c1"
group_id = "g1"

[[clusters]]
name = "c1"
group_id = "g1"

[[clusters]]
name = "c1"
group_id = "g2"
"#;
        let found = issues(toml, None);
        assert_eq!(found, vec!["cluster g1/c1 is declared more than once".to_string()]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(Playbook::parse("[[clusters]]\nname = \"c\"\nsize = \"M10\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{FULL}").unwrap();
        let playbook = Playbook::load(file.path()).unwrap();
        assert_eq!(playbook.len(), 4);

        let err = Playbook::load(Path::new("/nonexistent/site.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/site.toml"));
    }

    #[test]
    fn test_validation_error_message() {
        let err = ValidationError {
            issues: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "playbook has 2 problem(s):\n  - a\n  - b");
    }
}
