//! `validate` - check a playbook without calling Atlas

use anyhow::Result;
use atlaskit::CredentialProvider;
use declarative::{DesiredResource, LifecycleState, ResourceKind};
use std::path::Path;

use crate::Context;
use crate::credentials;
use crate::playbook::Playbook;
use crate::ui;

pub fn run(ctx: &Context, playbook: &Path) -> Result<()> {
    // Only the default group is needed; missing credentials are not an error here
    let default_group = credentials::provider(ctx.credentials.as_deref())
        .ok()
        .and_then(|p| default_group(p.as_ref()));

    let desired = check(playbook, default_group.as_deref())?;

    let count = |kind: ResourceKind, state: LifecycleState| {
        desired
            .iter()
            .filter(|r| r.kind() == kind && r.state() == state)
            .count()
    };
    ui::success(&format!("{} is valid", playbook.display()));
    ui::kv(
        "Clusters",
        &format!(
            "{} present, {} absent",
            count(ResourceKind::Cluster, LifecycleState::Present),
            count(ResourceKind::Cluster, LifecycleState::Absent)
        ),
    );
    ui::kv(
        "Users",
        &format!(
            "{} present, {} absent",
            count(ResourceKind::User, LifecycleState::Present),
            count(ResourceKind::User, LifecycleState::Absent)
        ),
    );
    Ok(())
}

fn default_group(provider: &dyn CredentialProvider) -> Option<String> {
    match provider.credentials() {
        Ok(creds) => creds.group_id,
        Err(e) => {
            log::debug!("No credentials for default group: {e}");
            None
        }
    }
}

/// Validate a playbook, printing every problem found
pub fn check(path: &Path, default_group: Option<&str>) -> Result<Vec<DesiredResource>> {
    let playbook = Playbook::load(path)?;
    match playbook.resolve(default_group) {
        Ok(desired) => Ok(desired),
        Err(err) => {
            for issue in &err.issues {
                ui::error(issue);
            }
            anyhow::bail!(
                "{} has {}",
                path.display(),
                ui::plural(err.issues.len(), "problem")
            )
        }
    }
}
