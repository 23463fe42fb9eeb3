//! Credential capability.
//!
//! The API client never looks credentials up itself. A [`CredentialProvider`]
//! is handed in by the caller, which keeps secret stores out of the library
//! and lets tests supply fixed credentials.

use crate::error::Result;
use crate::types::Secret;

/// Atlas programmatic API credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Public key / username used for digest authentication
    pub username: String,
    /// Private API key
    pub api_key: Secret,
    /// Group (project) used when a resource does not name one
    pub group_id: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: Secret::new(api_key),
            group_id: None,
        }
    }

    /// Set the default group.
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Source of API credentials.
pub trait CredentialProvider: Send + Sync {
    /// Resolve credentials.
    fn credentials(&self) -> Result<Credentials>;
}

/// Provider returning a fixed set of credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let provider = StaticCredentials(Credentials::new("public", "private").with_group("g1"));
        let creds = provider.credentials().unwrap();
        assert_eq!(creds.username, "public");
        assert_eq!(creds.api_key.expose(), "private");
        assert_eq!(creds.group_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_credentials_debug_hides_key() {
        let creds = Credentials::new("public", "very-secret-key");
        assert!(!format!("{creds:?}").contains("very-secret-key"));
    }
}
