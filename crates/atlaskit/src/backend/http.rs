//! Atlas admin API backend over HTTPS.
//!
//! This module provides the [`HttpBackend`] implementation, a blocking
//! client for the v1.0 admin API authenticated with HTTP Digest.

use crate::backend::Backend;
use crate::credentials::CredentialProvider;
use crate::digest::{Challenge, DigestSession};
use crate::error::{Error, Result};
use crate::types::{
    ADMIN_DATABASE, ClusterSpec, ClusterState, ClusterUpdate, DatabaseRole, InstanceSize,
    ProvisioningStatus, RoleSet, Secret, UserSpec, UserState, UserUpdate,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, PercentEncode, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use ureq::http::{Response, Uri};
use ureq::{Agent, Body, RequestBuilder};

/// Public Atlas admin API.
pub const DEFAULT_API_BASE: &str = "https://cloud.mongodb.com/api/atlas/v1.0";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Characters left as-is in a path segment (RFC 3986 unreserved).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn segment(raw: &str) -> PercentEncode<'_> {
    utf8_percent_encode(raw, SEGMENT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Atlas admin API backend.
///
/// # Example
///
/// ```no_run
/// use atlaskit::backend::http::HttpBackend;
/// use atlaskit::backend::Backend;
/// use atlaskit::credentials::{Credentials, StaticCredentials};
/// use std::sync::Arc;
///
/// let creds = StaticCredentials(Credentials::new("public-key", "private-key"));
/// let backend = HttpBackend::new(Arc::new(creds));
/// let cluster = backend.get_cluster("5f1a...", "test-mongo").unwrap();
/// println!("{cluster:?}");
/// ```
pub struct HttpBackend {
    agent: Agent,
    api_base: String,
    credentials: Arc<dyn CredentialProvider>,
    digest: DigestSession,
}

impl HttpBackend {
    /// Create a backend for the public Atlas API.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_options(credentials, DEFAULT_API_BASE, DEFAULT_TIMEOUT)
    }

    /// Create a backend with a custom API base and request timeout.
    #[must_use]
    pub fn with_options(
        credentials: Arc<dyn CredentialProvider>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: Agent::new_with_config(config),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
            digest: DigestSession::new(),
        }
    }

    /// Get the current API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn clusters_url(&self, group_id: &str) -> String {
        format!("{}/groups/{}/clusters", self.api_base, segment(group_id))
    }

    fn cluster_url(&self, group_id: &str, name: &str) -> String {
        format!("{}/{}", self.clusters_url(group_id), segment(name))
    }

    fn users_url(&self, group_id: &str) -> String {
        format!("{}/groups/{}/databaseUsers", self.api_base, segment(group_id))
    }

    fn user_url(&self, group_id: &str, username: &str) -> String {
        format!(
            "{}/{}/{}",
            self.users_url(group_id),
            ADMIN_DATABASE,
            segment(username)
        )
    }

    fn dispatch(
        &self,
        method: Method,
        url: &str,
        auth: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<Response<Body>> {
        let empty = serde_json::Value::Object(serde_json::Map::new());
        let response = match method {
            Method::Get => prepare(self.agent.get(url), auth).call()?,
            Method::Delete => prepare(self.agent.delete(url), auth).call()?,
            Method::Post => {
                prepare(self.agent.post(url), auth).send_json(body.unwrap_or(&empty))?
            }
            Method::Patch => {
                prepare(self.agent.patch(url), auth).send_json(body.unwrap_or(&empty))?
            }
        };
        Ok(response)
    }

    /// Send a request, answering one digest challenge if needed.
    ///
    /// Returns the status code and the response body.
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(u16, String)> {
        let uri = request_uri(url)?;
        let credentials = self.credentials.credentials()?;

        let auth = self.digest.header(&credentials, method.as_str(), &uri);
        let mut response = self.dispatch(method, url, auth.as_deref(), body)?;

        if response.status().as_u16() == 401 {
            let challenge = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .filter(|v| v.trim_start().starts_with("Digest"))
                .map(Challenge::parse)
                .transpose()?;

            if let Some(challenge) = challenge {
                log::debug!("digest challenge from {}", challenge.realm);
                self.digest.store(challenge);
                let auth = self.digest.header(&credentials, method.as_str(), &uri);
                response = self.dispatch(method, url, auth.as_deref(), body)?;
            }
        }

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        log::trace!("{} {} -> {}", method.as_str(), uri, status);
        Ok((status, text))
    }

    fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let (status, text) = self.request(Method::Get, url, None)?;
        match status {
            200..=299 => Ok(Some(serde_json::from_str(&text)?)),
            404 => Ok(None),
            _ => Err(Error::from_status(status, &text)),
        }
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let payload = serde_json::to_value(body)?;
        let (status, text) = self.request(method, url, Some(&payload))?;
        match status {
            200..=299 => Ok(serde_json::from_str(&text)?),
            _ => Err(Error::from_status(status, &text)),
        }
    }

    fn remove(&self, url: &str) -> Result<()> {
        let (status, text) = self.request(Method::Delete, url, None)?;
        match status {
            200..=299 => Ok(()),
            _ => Err(Error::from_status(status, &text)),
        }
    }
}

fn prepare<B>(request: RequestBuilder<B>, auth: Option<&str>) -> RequestBuilder<B> {
    let request = request
        .header("Accept", "application/json")
        .header("User-Agent", concat!("atlaskit/", env!("CARGO_PKG_VERSION")));
    match auth {
        Some(value) => request.header("Authorization", value),
        None => request,
    }
}

/// Path and query of a URL, as used in the digest `uri` field.
fn request_uri(url: &str) -> Result<String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::Invalid(format!("invalid URL {url}: {e}")))?;
    Ok(uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |p| p.as_str().to_string()))
}

impl Backend for HttpBackend {
    fn get_cluster(&self, group_id: &str, name: &str) -> Result<Option<ClusterState>> {
        self.fetch::<AtlasCluster>(&self.cluster_url(group_id, name))?
            .map(ClusterState::try_from)
            .transpose()
    }

    fn create_cluster(&self, group_id: &str, spec: &ClusterSpec) -> Result<ClusterState> {
        let created: AtlasCluster = self.send(
            Method::Post,
            &self.clusters_url(group_id),
            &ClusterCreateRequest::from(spec),
        )?;
        created.try_into()
    }

    fn update_cluster(
        &self,
        group_id: &str,
        name: &str,
        update: &ClusterUpdate,
    ) -> Result<ClusterState> {
        let updated: AtlasCluster = self.send(
            Method::Patch,
            &self.cluster_url(group_id, name),
            &ClusterUpdateRequest::from(update),
        )?;
        updated.try_into()
    }

    fn delete_cluster(&self, group_id: &str, name: &str) -> Result<()> {
        self.remove(&self.cluster_url(group_id, name))
    }

    fn get_user(&self, group_id: &str, username: &str) -> Result<Option<UserState>> {
        Ok(self
            .fetch::<AtlasUser>(&self.user_url(group_id, username))?
            .map(Into::into))
    }

    fn create_user(&self, group_id: &str, spec: &UserSpec) -> Result<UserState> {
        let request = UserCreateRequest {
            database_name: ADMIN_DATABASE,
            group_id,
            username: &spec.username,
            roles: spec.roles.iter().map(Into::into).collect(),
            password: spec.password.as_ref().map(Secret::expose),
        };
        let created: AtlasUser = self.send(Method::Post, &self.users_url(group_id), &request)?;
        Ok(created.into())
    }

    fn update_user(
        &self,
        group_id: &str,
        username: &str,
        update: &UserUpdate,
    ) -> Result<UserState> {
        let request = UserUpdateRequest {
            roles: update
                .roles
                .as_ref()
                .map(|roles| roles.iter().map(Into::into).collect()),
            password: update.password.as_ref().map(Secret::expose),
        };
        let updated: AtlasUser =
            self.send(Method::Patch, &self.user_url(group_id, username), &request)?;
        Ok(updated.into())
    }

    fn delete_user(&self, group_id: &str, username: &str) -> Result<()> {
        self.remove(&self.user_url(group_id, username))
    }
}

// =============================================================================
// Atlas API payload types
// =============================================================================

const PROVIDER_NAME: &str = "AWS";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterCreateRequest<'a> {
    name: &'a str,
    num_shards: u32,
    replication_factor: u32,
    backup_enabled: bool,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    disk_size_gb: Option<f64>,
    provider_settings: ProviderSettingsRequest<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderSettingsRequest<'a> {
    provider_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    region_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_size_name: Option<&'static str>,
    #[serde(rename = "diskIOPS", skip_serializing_if = "Option::is_none")]
    disk_iops: Option<u32>,
    #[serde(rename = "encryptEBSVolume", skip_serializing_if = "Option::is_none")]
    encrypt_ebs_volume: Option<bool>,
}

impl<'a> From<&'a ClusterSpec> for ClusterCreateRequest<'a> {
    fn from(spec: &'a ClusterSpec) -> Self {
        Self {
            name: &spec.name,
            num_shards: spec.num_shards,
            replication_factor: spec.replication_factor,
            backup_enabled: spec.backup_enabled,
            disk_size_gb: spec.disk_size_gb,
            provider_settings: ProviderSettingsRequest {
                provider_name: &spec.provider,
                region_name: Some(&spec.region_name),
                instance_size_name: Some(spec.instance_size.as_str()),
                disk_iops: spec.disk_iops,
                encrypt_ebs_volume: Some(spec.encrypt),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    backup_enabled: Option<bool>,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    disk_size_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_settings: Option<ProviderSettingsRequest<'static>>,
}

impl From<&ClusterUpdate> for ClusterUpdateRequest {
    fn from(update: &ClusterUpdate) -> Self {
        let provider_settings = (update.instance_size.is_some() || update.encrypt.is_some())
            .then(|| ProviderSettingsRequest {
                provider_name: PROVIDER_NAME,
                region_name: None,
                instance_size_name: update.instance_size.map(|s| s.as_str()),
                disk_iops: None,
                encrypt_ebs_volume: update.encrypt,
            });
        Self {
            backup_enabled: update.backup_enabled,
            disk_size_gb: update.disk_size_gb,
            provider_settings,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasCluster {
    name: String,
    #[serde(default)]
    num_shards: Option<u32>,
    #[serde(default)]
    replication_factor: Option<u32>,
    #[serde(default)]
    backup_enabled: bool,
    #[serde(rename = "diskSizeGB", default)]
    disk_size_gb: Option<f64>,
    #[serde(default)]
    state_name: String,
    provider_settings: AtlasProviderSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasProviderSettings {
    #[serde(default)]
    region_name: Option<String>,
    instance_size_name: String,
    #[serde(rename = "encryptEBSVolume", default)]
    encrypt_ebs_volume: bool,
}

impl TryFrom<AtlasCluster> for ClusterState {
    type Error = Error;

    fn try_from(c: AtlasCluster) -> Result<Self> {
        let instance_size: InstanceSize = c
            .provider_settings
            .instance_size_name
            .parse()
            .map_err(|e: Error| Error::InvalidResponse(e.to_string()))?;
        Ok(Self {
            name: c.name,
            instance_size,
            encrypt: c.provider_settings.encrypt_ebs_volume,
            backup_enabled: c.backup_enabled,
            num_shards: c.num_shards.unwrap_or(1),
            replication_factor: c.replication_factor.unwrap_or(3),
            region_name: c.provider_settings.region_name.unwrap_or_default(),
            disk_size_gb: c.disk_size_gb,
            status: ProvisioningStatus::from_state_name(&c.state_name),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasRole {
    role_name: String,
    database_name: String,
}

impl From<&DatabaseRole> for AtlasRole {
    fn from(role: &DatabaseRole) -> Self {
        Self {
            role_name: role.role_name.clone(),
            database_name: role.database_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserCreateRequest<'a> {
    database_name: &'a str,
    group_id: &'a str,
    username: &'a str,
    roles: Vec<AtlasRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserUpdateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    roles: Option<Vec<AtlasRole>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtlasUser {
    username: String,
    #[serde(default)]
    roles: Vec<AtlasRole>,
}

impl From<AtlasUser> for UserState {
    fn from(u: AtlasUser) -> Self {
        let roles: RoleSet = u
            .roles
            .into_iter()
            .map(|r| DatabaseRole::on(r.role_name, r.database_name))
            .collect();
        Self {
            username: u.username,
            roles,
        }
    }
}
