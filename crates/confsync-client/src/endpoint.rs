use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::env::Environment;
use crate::error::SyncError;

const CENTER_FILE: &str = "comm/center.toml";
const DEFAULT_VERSION: &str = "1.0";

/// Immutable description of the configuration center connection for one
/// subscription: where to reach it and how to identify ourselves.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub tcp_address: String,
    pub http_address: String,
    pub group_id: String,
    pub artifact_id: String,
    pub profile: String,
    pub version: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CenterFileBody {
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    artifact_id: String,
    #[serde(default)]
    secret_key: String,
    #[serde(default)]
    tcp_address: String,
    #[serde(default)]
    http_address: String,
    #[serde(default)]
    version: String,
}

impl Endpoint {
    /// Loads `<conf_root>/comm/center.toml` and fills in the profile from
    /// the environment. An empty string is a legal value for every auth
    /// field; the center decides validity.
    pub fn load(env: &Environment) -> Result<Self, SyncError> {
        let path = env.conf_root().join(CENTER_FILE);
        let body = read_center_file(&path)?;
        let mut endpoint = Self {
            tcp_address: body.tcp_address.trim().to_string(),
            http_address: body.http_address.trim().to_string(),
            group_id: body.group_id.trim().to_string(),
            artifact_id: body.artifact_id.trim().to_string(),
            profile: env.profile().to_string(),
            version: body.version.trim().to_string(),
            secret_key: body.secret_key.trim().to_string(),
        };
        if endpoint.version.is_empty() {
            endpoint.version = DEFAULT_VERSION.to_string();
        }
        if endpoint.group_id.is_empty() {
            return Err(SyncError::Env(format!(
                "{} is missing `group_id`",
                path.display()
            )));
        }
        Ok(endpoint)
    }

    /// Derives the per-subscription endpoint from a logical name of the
    /// form `artifact.version`. A name without a dot keeps the default
    /// version and names the artifact directly.
    pub fn for_name(
        &self,
        name: &str,
    ) -> Endpoint {
        let mut endpoint = self.clone();
        match name.split_once('.') {
            Some((artifact, version))
                if !artifact.is_empty() && !version.is_empty() =>
            {
                endpoint.artifact_id = artifact.to_string();
                endpoint.version = version.to_string();
            }
            _ => endpoint.artifact_id = name.to_string(),
        }
        endpoint
    }

    /// Auth map carried in GETCONFIG requests and HTTP pull parameters.
    pub fn auth(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("groupId".to_string(), self.group_id.clone()),
            ("artifactId".to_string(), self.artifact_id.clone()),
            ("version".to_string(), self.version.clone()),
            ("profile".to_string(), self.profile.clone()),
            ("secretKey".to_string(), self.secret_key.clone()),
        ])
    }
}

fn read_center_file(path: &Path) -> Result<CenterFileBody, SyncError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        SyncError::FileRead { path: path.to_path_buf(), source }
    })?;
    toml::from_str(&raw).map_err(|source| SyncError::FileParse {
        path: path.to_path_buf(),
        source,
    })
}
