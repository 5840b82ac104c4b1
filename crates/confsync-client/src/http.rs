use reqwest::Url;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::SyncError;

const CONFIG_URI: &str = "/clientapi/config";

/// One-shot pull of the `configs` list over HTTP.
///
/// A success body is the bare JSON list; a failure body is an object
/// whose `success` field is false, surfaced as [`SyncError::Server`].
pub async fn pull_configs(
    endpoint: &Endpoint
) -> Result<Vec<serde_json::Value>, SyncError> {
    let url = config_url(endpoint)?;
    debug!(
        "pulling configuration over http: artifact={}, version={}",
        endpoint.artifact_id, endpoint.version
    );

    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(SyncError::Server(format!(
            "http status {}",
            response.status()
        )));
    }

    let body = response.bytes().await?;
    parse_body(&body)
}

fn parse_body(body: &[u8]) -> Result<Vec<serde_json::Value>, SyncError> {
    let parsed: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| SyncError::Server(format!("unparsable body: {err}")))?;

    match parsed {
        serde_json::Value::Array(configs) => Ok(configs),
        other => {
            if other.get("success").and_then(serde_json::Value::as_bool)
                == Some(false)
            {
                return Err(SyncError::Server(other.to_string()));
            }
            Err(SyncError::Server(format!(
                "unexpected body shape: {other}"
            )))
        }
    }
}

fn config_url(endpoint: &Endpoint) -> Result<Url, SyncError> {
    let base = format!("http://{}{CONFIG_URI}", endpoint.http_address);
    let mut url = Url::parse(&base).map_err(|err| {
        SyncError::Env(format!(
            "center http_address invalid ({}): {err}",
            endpoint.http_address
        ))
    })?;
    url.query_pairs_mut()
        .append_pair("groupId", &endpoint.group_id)
        .append_pair("artifactId", &endpoint.artifact_id)
        .append_pair("version", &endpoint.version)
        .append_pair("profile", &endpoint.profile)
        .append_pair("secretKey", &endpoint.secret_key)
        .append_pair("format", "json");
    Ok(url)
}
