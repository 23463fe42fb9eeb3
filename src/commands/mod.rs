pub mod apply;
pub mod diff;
pub mod status;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use atlaskit::backend::http::HttpBackend;
use declarative::{DesiredResource, Reconciler};
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::credentials;
use crate::playbook::Playbook;
use crate::settings::Settings;
use crate::ui;

/// Declared resources plus an engine connected to Atlas
pub struct Session {
    pub desired: Vec<DesiredResource>,
    pub reconciler: Reconciler,
}

/// Resolve credentials, load the playbook and connect.
pub fn open(ctx: &Context, playbook: &Path, settings: &Settings, dry_run: bool) -> Result<Session> {
    let provider = credentials::provider(ctx.credentials.as_deref())?;
    let creds = provider
        .credentials()
        .context("Could not resolve Atlas credentials")?;
    log::info!("Authenticating as {}", creds.username);

    let desired = load_playbook(playbook, creds.group_id.as_deref())?;

    let backend =
        HttpBackend::with_options(provider, &settings.api_base, settings.request_timeout());
    log::debug!("Using Atlas API at {}", backend.api_base());

    Ok(Session {
        desired,
        reconciler: Reconciler::new(Arc::new(backend), settings.execute_options(dry_run)),
    })
}

/// Load and validate a playbook
pub fn load_playbook(path: &Path, default_group: Option<&str>) -> Result<Vec<DesiredResource>> {
    let playbook = Playbook::load(path)?;
    let desired = playbook
        .resolve(default_group)
        .with_context(|| format!("Invalid playbook {}", path.display()))?;
    if desired.is_empty() {
        ui::warn("Playbook declares no resources");
    }
    Ok(desired)
}

#[cfg(test)]
pub(crate) mod testing {
    use atlaskit::{MockBackend, PollConfig, RetryConfig};
    use declarative::{ExecuteOptions, Reconciler};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn ctx() -> crate::Context {
        crate::Context {
            verbose: 0,
            quiet: true,
            credentials: None,
        }
    }

    pub fn reconciler(mock: &MockBackend, dry_run: bool) -> Reconciler {
        let options = ExecuteOptions {
            dry_run,
            jobs: 2,
            retry: RetryConfig::new(2, Duration::from_millis(1), 1.0),
            poll: PollConfig::new(Duration::from_millis(1), Duration::from_millis(500)),
        };
        Reconciler::new(Arc::new(mock.clone()), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_playbook_reports_issues() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[[clusters]]\nname = \"c1\"").unwrap();

        let err = load_playbook(file.path(), None).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Invalid playbook"));
        assert!(message.contains("cluster 'c1': no group_id"));

        let desired = load_playbook(file.path(), Some("g1")).unwrap();
        assert_eq!(desired.len(), 1);
    }
}
