//! File-transfer credential verification.
//!
//! Backs the managed file-transfer service's custom identity provider:
//! a submitted username/password pair is checked against the stored
//! credential secret, and a routing response (role plus home directory)
//! is returned only on an exact match. Any mismatch, missing field, or
//! internal error collapses to the empty response -- errors never cross
//! this boundary, because the transfer service treats anything else as
//! an authentication outage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Credential-check request as delivered by the transfer service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub source_ip: Option<String>,
}

/// Routing response returned on a successful match. The empty variant
/// (all fields absent) denies access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_directory_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_directory: Option<String>,
}

impl AuthResponse {
    /// The deny-access response.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none()
    }
}

/// Stored credential pair the request is checked against.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredCredentials {
    pub username: String,
    pub password: String,
}

/// Errors from credential retrieval. Internal to this crate; they never
/// escape [`TransferAuth::evaluate`].
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential retrieval failed: {0}")]
    Request(String),

    #[error("Credential secret has no string payload")]
    MissingPayload,

    #[error("Credential secret is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of the stored credential pair.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<StoredCredentials, CredentialError>;
}

/// Secrets Manager-backed [`CredentialSource`].
pub struct SecretsManagerCredentials {
    client: aws_sdk_secretsmanager::Client,
    secret_id: String,
}

impl SecretsManagerCredentials {
    pub fn new(sdk_config: &aws_config::SdkConfig, secret_id: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(sdk_config),
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for SecretsManagerCredentials {
    async fn fetch(&self) -> Result<StoredCredentials, CredentialError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let payload = response
            .secret_string()
            .ok_or(CredentialError::MissingPayload)?;

        Ok(serde_json::from_str(payload)?)
    }
}

/// The credential-check handler.
pub struct TransferAuth<S> {
    source: S,
    role_arn: String,
    bucket: String,
}

impl<S: CredentialSource> TransferAuth<S> {
    /// * `role_arn` - role granted to authenticated sessions.
    /// * `bucket`   - bucket whose root becomes the home directory.
    pub fn new(source: S, role_arn: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            source,
            role_arn: role_arn.into(),
            bucket: bucket.into(),
        }
    }

    /// Evaluate a credential-check request.
    ///
    /// Never returns an error: every failure path collapses to the
    /// empty response.
    pub async fn evaluate(&self, request: &AuthRequest) -> AuthResponse {
        if request.username.is_empty() || request.password.is_empty() {
            tracing::info!("Missing username or password");
            return AuthResponse::empty();
        }

        let stored = match self.source.fetch().await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(error = %e, "Credential lookup failed");
                return AuthResponse::empty();
            }
        };

        if request.username == stored.username && request.password == stored.password {
            tracing::info!(
                username = %request.username,
                protocol = %request.protocol,
                server_id = %request.server_id,
                "Authentication succeeded",
            );
            AuthResponse {
                role: Some(self.role_arn.clone()),
                home_directory_type: Some("PATH".to_string()),
                home_directory: Some(format!("/{}", self.bucket)),
            }
        } else {
            tracing::info!(username = %request.username, "Authentication failed");
            AuthResponse::empty()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
