//! Credential providers for the Atlas API
//!
//! Keys come from the environment or from a TOML file:
//!
//! ```toml
//! username = "public-key"
//! api_key = "private-key"
//! group_id = "5f1a..."   # optional default group
//! ```

use atlaskit::{CredentialProvider, Credentials, Error};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::paths;

pub const ENV_USERNAME: &str = "ATLAS_USERNAME";
pub const ENV_API_KEY: &str = "ATLAS_API_KEY";
pub const ENV_GROUP_ID: &str = "ATLAS_GROUP_ID";

/// Reads `ATLAS_USERNAME`, `ATLAS_API_KEY` and `ATLAS_GROUP_ID`
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> atlaskit::Result<Credentials> {
        let username = non_empty_var(ENV_USERNAME)?;
        let api_key = non_empty_var(ENV_API_KEY)?;
        let mut creds = Credentials::new(username, api_key);
        if let Ok(group) = std::env::var(ENV_GROUP_ID)
            && !group.is_empty()
        {
            creds = creds.with_group(group);
        }
        Ok(creds)
    }
}

fn non_empty_var(key: &str) -> atlaskit::Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Invalid(format!("{key} is not set"))),
    }
}

/// Reads a credentials TOML file
pub struct FileCredentials {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsFile {
    username: String,
    api_key: String,
    #[serde(default)]
    group_id: Option<String>,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for FileCredentials {
    fn credentials(&self) -> atlaskit::Result<Credentials> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            Error::Invalid(format!("could not read {}: {e}", self.path.display()))
        })?;
        // The parse error may quote the offending line, so it is not included
        let file: CredentialsFile = toml::from_str(&content).map_err(|_| {
            Error::Invalid(format!("invalid credentials file {}", self.path.display()))
        })?;

        let mut creds = Credentials::new(file.username, file.api_key);
        if let Some(group) = file.group_id.filter(|g| !g.is_empty()) {
            creds = creds.with_group(group);
        }
        Ok(creds)
    }
}

/// Tries providers in order and returns the first credentials found
pub struct ChainCredentials {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainCredentials {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }
}

impl CredentialProvider for ChainCredentials {
    fn credentials(&self) -> atlaskit::Result<Credentials> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match provider.credentials() {
                Ok(creds) => return Ok(creds),
                Err(e) => {
                    log::debug!("Credential source skipped: {e}");
                    reasons.push(e.to_string());
                }
            }
        }
        Err(Error::Invalid(format!(
            "no Atlas credentials found ({})",
            reasons.join("; ")
        )))
    }
}

/// Default provider chain.
///
/// An explicit `--credentials` file is the only source when given.
/// Otherwise the environment is tried before the config-dir file.
pub fn provider(explicit: Option<&Path>) -> anyhow::Result<Arc<dyn CredentialProvider>> {
    if let Some(path) = explicit {
        let path = paths::expand(&path.to_string_lossy());
        log::debug!("Using credentials file {}", path.display());
        return Ok(Arc::new(FileCredentials::new(path)));
    }

    Ok(Arc::new(ChainCredentials::new(vec![
        Box::new(EnvCredentials),
        Box::new(FileCredentials::new(paths::credentials_file()?)),
    ])))
}
