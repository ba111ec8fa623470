//! Metered API key provisioning
//!
//! One authenticated `POST /keys` per run. Any transport error or non-success
//! status is a hard failure, and so is a success response without a `key`.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ProvisioningConfig;
use crate::error::ProvisionError;

/// Request body for `POST /keys`
#[derive(Debug, Clone, Serialize)]
pub struct KeyRequest {
    pub name: String,
    pub label: String,
    pub limit: f64,
}

impl From<&ProvisioningConfig> for KeyRequest {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            name: config.key_name.clone(),
            label: config.key_label.clone(),
            limit: config.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyResponse {
    #[serde(default)]
    key: Option<String>,
}

/// A freshly issued key. Lives in memory for the run only; has one consumer.
pub struct ProvisionedCredential {
    secret: SecretString,
    label: String,
    limit: f64,
}

impl ProvisionedCredential {
    pub fn new(secret: impl Into<String>, label: impl Into<String>, limit: f64) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            label: label.into(),
            limit,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Plaintext key, for embedding in the notification only
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Safe-to-log preview: last four characters only
    pub fn redacted(&self) -> String {
        let key = self.secret.expose_secret();
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if key.chars().count() > 8 {
            format!("…{}", tail)
        } else {
            "…".to_string()
        }
    }
}

impl fmt::Debug for ProvisionedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedCredential")
            .field("secret", &"[REDACTED]")
            .field("label", &self.label)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Interpret the provisioning response
pub fn parse_key_response(
    status: u16,
    body: &str,
    request: &KeyRequest,
) -> Result<ProvisionedCredential, ProvisionError> {
    if !(200..300).contains(&status) {
        return Err(ProvisionError::Status {
            status,
            body: body.to_string(),
        });
    }

    let response: KeyResponse = serde_json::from_str(body)?;
    match response.key {
        Some(key) if !key.trim().is_empty() => Ok(ProvisionedCredential::new(
            key,
            request.label.clone(),
            request.limit,
        )),
        _ => Err(ProvisionError::MissingKey),
    }
}

#[async_trait]
pub trait KeyProvisioner: Send + Sync {
    async fn provision(&self) -> Result<ProvisionedCredential, ProvisionError>;
}

/// Client for the key provisioning API (OpenRouter-compatible)
pub struct ProvisioningClient {
    client: reqwest::Client,
    api_base: String,
    api_key: SecretString,
    request: KeyRequest,
}

impl ProvisioningClient {
    pub fn new(client: reqwest::Client, config: &ProvisioningConfig, api_key: SecretString) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            request: KeyRequest::from(config),
        }
    }

    fn keys_url(&self) -> String {
        format!("{}/keys", self.api_base)
    }
}

#[async_trait]
impl KeyProvisioner for ProvisioningClient {
    async fn provision(&self) -> Result<ProvisionedCredential, ProvisionError> {
        info!(
            "Creating API key '{}' (label {}, limit {})",
            self.request.name, self.request.label, self.request.limit
        );

        let response = self
            .client
            .post(self.keys_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&self.request)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to provision API key: {}", e);
                ProvisionError::from(e)
            })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        let credential = parse_key_response(status, &body, &self.request).map_err(|e| {
            error!("Failed to provision API key: {}", e);
            e
        })?;

        info!("API key generated ({})", credential.redacted());
        Ok(credential)
    }
}
