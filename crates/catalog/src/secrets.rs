//! Catalog connection-string retrieval from AWS Secrets Manager.
//!
//! The secret payload is opaque to the rest of the system beyond
//! "returns a connection string or fails": a JSON object carrying the
//! catalog URI under `MONGODB_URI`.

use std::time::Duration;

use aws_sdk_secretsmanager::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use serde::Deserialize;

/// Errors from secret retrieval.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The Secrets Manager request itself failed.
    #[error("Secret retrieval failed: {0}")]
    Request(String),

    /// The secret exists but has no string payload.
    #[error("Secret {secret_id} has no string payload")]
    MissingPayload { secret_id: String },

    /// The payload is not the expected JSON shape.
    #[error("Secret payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Expected shape of the catalog connection secret.
#[derive(Debug, Deserialize)]
struct CatalogSecret {
    #[serde(rename = "MONGODB_URI")]
    uri: String,
}

/// Build a Secrets Manager client from the shared SDK config with a
/// bounded per-operation timeout.
pub fn build_client(sdk_config: &aws_config::SdkConfig, operation_timeout: Duration) -> Client {
    let timeout = TimeoutConfig::builder()
        .operation_timeout(operation_timeout)
        .build();
    let config = aws_sdk_secretsmanager::config::Builder::from(sdk_config)
        .timeout_config(timeout)
        .build();
    Client::from_conf(config)
}

/// Fetch and decode the catalog connection string.
pub async fn fetch_connection_string(
    client: &Client,
    secret_id: &str,
) -> Result<String, SecretError> {
    tracing::info!(secret_id, "Retrieving catalog connection secret");

    let response = client
        .get_secret_value()
        .secret_id(secret_id)
        .send()
        .await
        .map_err(|e| SecretError::Request(e.to_string()))?;

    let payload = response
        .secret_string()
        .ok_or_else(|| SecretError::MissingPayload {
            secret_id: secret_id.to_string(),
        })?;

    let secret: CatalogSecret = serde_json::from_str(payload)?;
    Ok(secret.uri)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
