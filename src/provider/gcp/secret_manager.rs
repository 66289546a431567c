//! # GCP Secret Manager
//!
//! Vault-secret adapter over the Secret Manager REST API v1.
//!
//! The certificate and the key live in two separate secrets. Versions are an
//! append-only ledger: a sync never rewrites or deletes a version, it only adds
//! a new one when the latest differs from the desired payload.
//!
//! References:
//! - [GCP Secret Manager REST API v1](https://cloud.google.com/secret-manager/docs/reference/rest)

use super::client::GcpRestClient;
use crate::provider::{Credential, Fetcher, Syncer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

/// Secret payload containing the actual secret data
///
/// The `data` field is base64-encoded on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct SecretPayload {
    pub data: String,
}

/// Request body for `POST /v1/projects/{project}/secrets/{secret}:addVersion`
#[derive(Debug, Serialize, Deserialize)]
pub struct AddVersionRequest {
    pub payload: SecretPayload,
}

/// Response from `GET /v1/projects/{project}/secrets/{secret}/versions/latest:access`
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessSecretVersionResponse {
    pub name: String,
    pub payload: SecretPayload,
}

/// Secret version returned by `addVersion`
#[derive(Debug, Serialize, Deserialize)]
pub struct SecretVersion {
    pub name: String,
}

/// GCP Secret Manager client bound to one project
#[derive(Debug, Clone)]
pub struct SecretManagerREST {
    client: GcpRestClient,
    project_id: String,
}

impl SecretManagerREST {
    #[must_use]
    pub fn new(client: GcpRestClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Payload of the latest version, or `None` if the secret has none
    pub async fn access_latest(&self, secret_name: &str) -> Result<Option<Vec<u8>>> {
        let path = format!(
            "projects/{}/secrets/{}/versions/latest:access",
            self.project_id, secret_name
        );
        let Some(response) = self
            .client
            .get_optional::<AccessSecretVersionResponse>(&path)
            .await
            .with_context(|| format!("access latest version of {secret_name}"))?
        else {
            return Ok(None);
        };

        let decoded = general_purpose::STANDARD
            .decode(response.payload.data.as_bytes())
            .context("Failed to decode base64 secret data")?;
        Ok(Some(decoded))
    }

    /// Append a new version holding `data`
    pub async fn add_version(&self, secret_name: &str, data: &[u8]) -> Result<()> {
        let path = format!("projects/{}/secrets/{}:addVersion", self.project_id, secret_name);
        let request = AddVersionRequest {
            payload: SecretPayload {
                data: general_purpose::STANDARD.encode(data),
            },
        };

        let version: SecretVersion = self
            .client
            .call(Method::POST, &path, &[], Some(&request))
            .await
            .with_context(|| format!("add secret version to {secret_name}"))?;
        debug!(version = %version.name, "Added secret version");
        Ok(())
    }

    /// Make the latest version of `secret_name` equal `data`
    ///
    /// Returns true if a new version was added.
    pub async fn reconcile_secret(&self, secret_name: &str, data: &[u8]) -> Result<bool> {
        let latest = self.access_latest(secret_name).await?;
        if latest.as_deref() == Some(data) {
            return Ok(false);
        }

        info!(
            secret = secret_name,
            project = %self.project_id,
            "Adding secret version"
        );
        self.add_version(secret_name, data).await?;
        Ok(true)
    }
}

/// Reads the credential from the latest versions of two secrets
#[derive(Debug, Clone)]
pub struct SecretManagerFetcher {
    client: SecretManagerREST,
    cert_name: String,
    key_name: String,
}

impl SecretManagerFetcher {
    #[must_use]
    pub fn new(
        client: SecretManagerREST,
        cert_name: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cert_name: cert_name.into(),
            key_name: key_name.into(),
        }
    }

    async fn latest(&self, secret_name: &str) -> Result<Vec<u8>> {
        self.client
            .access_latest(secret_name)
            .await?
            .with_context(|| {
                format!(
                    "secret {} in project {} has no versions",
                    secret_name,
                    self.client.project_id()
                )
            })
    }
}

#[async_trait]
impl Fetcher for SecretManagerFetcher {
    async fn fetch(&self) -> Result<Credential> {
        let certificate = self.latest(&self.cert_name).await?;
        let private_key = self.latest(&self.key_name).await?;
        Ok(Credential::new(certificate, private_key))
    }
}

/// Keeps the certificate and key secrets at the desired payloads
#[derive(Debug, Clone)]
pub struct SecretManagerSyncer {
    client: SecretManagerREST,
    cert_name: String,
    key_name: String,
}

impl SecretManagerSyncer {
    #[must_use]
    pub fn new(
        client: SecretManagerREST,
        cert_name: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cert_name: cert_name.into(),
            key_name: key_name.into(),
        }
    }
}

#[async_trait]
impl Syncer for SecretManagerSyncer {
    fn name(&self) -> &'static str {
        "secret-manager"
    }

    async fn sync(&self, credential: &Credential) -> Result<()> {
        let span = info_span!(
            "gcp.secret.sync",
            project.id = %self.client.project_id(),
            cert.secret = %self.cert_name,
            key.secret = %self.key_name
        );
        async move {
            self.client
                .reconcile_secret(&self.cert_name, credential.certificate())
                .await
                .with_context(|| format!("reconcile certificate secret {}", self.cert_name))?;
            self.client
                .reconcile_secret(&self.key_name, credential.private_key())
                .await
                .with_context(|| format!("reconcile private key secret {}", self.key_name))?;
            Ok(())
        }
        .instrument(span)
        .await
    }
}
