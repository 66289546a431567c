//! # GCP Certificate Manager
//!
//! Certificate-map adapter over the Certificate Manager REST API v1.
//!
//! Three resources are kept coherent on every sync:
//! 1. a self-managed certificate whose name is derived from the certificate
//!    bytes, so an existing object never needs updating
//! 2. a certificate map entry binding the configured hostname to exactly that
//!    certificate
//! 3. certificates the entry pointed at before, deleted once unbound
//!
//! Every mutation waits for its long-running operation before the next step
//! starts. A sync that fails half-way leaves a state the next sync resumes
//! from: the content-addressed certificate is found and creation is skipped.
//!
//! References:
//! - [Certificate Manager REST API v1](https://cloud.google.com/certificate-manager/docs/reference/certificate-manager/rest)

use super::client::GcpRestClient;
use super::operations::{wait_for_operation, Operation};
use crate::constants::{CERTIFICATE_HASH_BYTES, MANAGED_BY_LABEL_KEY, MANAGED_BY_LABEL_VALUE};
use crate::provider::{Credential, Syncer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, info_span, warn, Instrument};

/// Content-addressed certificate id: `prefix` + hex of the first bytes of SHA-256
#[must_use]
pub fn certificate_id(prefix: &str, certificate: &[u8]) -> String {
    let digest = Sha256::digest(certificate);
    format!("{}{}", prefix, hex::encode(&digest[..CERTIFICATE_HASH_BYTES]))
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        MANAGED_BY_LABEL_KEY.to_string(),
        MANAGED_BY_LABEL_VALUE.to_string(),
    )])
}

fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels
        .get(MANAGED_BY_LABEL_KEY)
        .is_some_and(|value| value == MANAGED_BY_LABEL_VALUE)
}

/// Certificate resource as returned by the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Self-managed certificate material sent on creation
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfManagedCertificate {
    pub pem_certificate: String,
    pub pem_private_key: String,
}

/// Request body for `POST .../certificates?certificateId=`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCertificateRequest {
    pub labels: BTreeMap<String, String>,
    pub self_managed: SelfManagedCertificate,
}

/// Certificate map entry resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMapEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Full resource names of the bound certificates
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Certificate Manager client bound to one project and location
#[derive(Debug, Clone)]
pub struct CertificateManagerREST {
    client: GcpRestClient,
    project_id: String,
    location: String,
}

impl CertificateManagerREST {
    #[must_use]
    pub fn new(
        client: GcpRestClient,
        project_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            location: location.into(),
        }
    }

    fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.location)
    }

    /// Full resource name of a certificate in this project/location
    #[must_use]
    pub fn certificate_name(&self, certificate_id: &str) -> String {
        format!("{}/certificates/{}", self.parent(), certificate_id)
    }

    fn map_path(&self, map_name: &str) -> String {
        format!("{}/certificateMaps/{}", self.parent(), map_name)
    }

    fn map_entry_name(&self, map_name: &str, entry_name: &str) -> String {
        format!(
            "{}/certificateMapEntries/{}",
            self.map_path(map_name),
            entry_name
        )
    }

    pub async fn get_certificate(&self, name: &str) -> Result<Option<Certificate>> {
        self.client
            .get_optional(name)
            .await
            .context("get certificate")
    }

    pub async fn create_certificate(&self, certificate_id: &str, credential: &Credential) -> Result<()> {
        let request = CreateCertificateRequest {
            labels: managed_labels(),
            self_managed: SelfManagedCertificate {
                pem_certificate: String::from_utf8(credential.certificate().to_vec())
                    .context("certificate is not valid UTF-8 PEM")?,
                pem_private_key: String::from_utf8(credential.private_key().to_vec())
                    .context("private key is not valid UTF-8 PEM")?,
            },
        };

        let operation: Operation = self
            .client
            .call(
                Method::POST,
                &format!("{}/certificates", self.parent()),
                &[("certificateId", certificate_id)],
                Some(&request),
            )
            .await
            .context("create certificate")?;
        wait_for_operation(&self.client, operation)
            .await
            .context("wait for certificate creation")?;
        Ok(())
    }

    pub async fn delete_certificate(&self, name: &str) -> Result<()> {
        let operation: Operation = self
            .client
            .call::<(), _>(Method::DELETE, name, &[], None)
            .await
            .context("delete certificate")?;
        wait_for_operation(&self.client, operation)
            .await
            .context("wait for certificate deletion")?;
        Ok(())
    }

    pub async fn get_map_entry(
        &self,
        map_name: &str,
        entry_name: &str,
    ) -> Result<Option<CertificateMapEntry>> {
        self.client
            .get_optional(&self.map_entry_name(map_name, entry_name))
            .await
            .context("get certificate map entry")
    }

    pub async fn create_map_entry(
        &self,
        map_name: &str,
        entry_name: &str,
        hostname: &str,
        certificates: Vec<String>,
    ) -> Result<()> {
        let entry = CertificateMapEntry {
            labels: managed_labels(),
            certificates,
            hostname: Some(hostname.to_string()),
            ..CertificateMapEntry::default()
        };

        let operation: Operation = self
            .client
            .call(
                Method::POST,
                &format!("{}/certificateMapEntries", self.map_path(map_name)),
                &[("certificateMapEntryId", entry_name)],
                Some(&entry),
            )
            .await
            .context("create certificate map entry")?;
        wait_for_operation(&self.client, operation)
            .await
            .context("wait for certificate map entry creation")?;
        Ok(())
    }

    /// Replace the entry's certificate list, leaving every other field untouched
    pub async fn update_map_entry_certificates(
        &self,
        map_name: &str,
        entry_name: &str,
        certificates: Vec<String>,
    ) -> Result<()> {
        let patch = CertificateMapEntry {
            certificates,
            ..CertificateMapEntry::default()
        };

        let operation: Operation = self
            .client
            .call(
                Method::PATCH,
                &self.map_entry_name(map_name, entry_name),
                &[("updateMask", "certificates")],
                Some(&patch),
            )
            .await
            .context("update certificate map entry")?;
        wait_for_operation(&self.client, operation)
            .await
            .context("wait for certificate map entry update")?;
        Ok(())
    }
}

/// Binds the credential to a hostname through a certificate map entry
#[derive(Debug, Clone)]
pub struct CertificateManagerSyncer {
    client: CertificateManagerREST,
    host_name: String,
    certificate_name_prefix: String,
    certificate_map_name: String,
    certificate_map_entry_name: String,
}

impl CertificateManagerSyncer {
    #[must_use]
    pub fn new(
        client: CertificateManagerREST,
        host_name: impl Into<String>,
        certificate_name_prefix: impl Into<String>,
        certificate_map_name: impl Into<String>,
        certificate_map_entry_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            host_name: host_name.into(),
            certificate_name_prefix: certificate_name_prefix.into(),
            certificate_map_name: certificate_map_name.into(),
            certificate_map_entry_name: certificate_map_entry_name.into(),
        }
    }

    async fn ensure_certificate(&self, certificate_id: &str, credential: &Credential) -> Result<()> {
        let full_name = self.client.certificate_name(certificate_id);
        if self.client.get_certificate(&full_name).await?.is_some() {
            return Ok(());
        }

        info!(certificate = certificate_id, "Start creating certificate");
        self.client
            .create_certificate(certificate_id, credential)
            .await?;
        info!(certificate = certificate_id, "Complete creating certificate");
        Ok(())
    }

    /// Point the map entry at `certificate` only
    ///
    /// `current` is the entry as read before the certificate was ensured.
    /// Returns the certificates that were unbound by this call.
    async fn bind_map_entry(
        &self,
        current: Option<CertificateMapEntry>,
        certificate: &str,
    ) -> Result<Vec<String>> {
        let map = &self.certificate_map_name;
        let entry_name = &self.certificate_map_entry_name;

        let Some(entry) = current else {
            info!(entry = %entry_name, "Start creating certificate map entry");
            self.client
                .create_map_entry(map, entry_name, &self.host_name, vec![certificate.to_string()])
                .await?;
            info!(entry = %entry_name, "Complete creating certificate map entry");
            return Ok(Vec::new());
        };

        if entry.certificates.len() == 1 && entry.certificates[0] == certificate {
            return Ok(Vec::new());
        }

        info!(entry = %entry_name, "Start updating certificate map entry");
        self.client
            .update_map_entry_certificates(map, entry_name, vec![certificate.to_string()])
            .await?;
        info!(entry = %entry_name, "Complete updating certificate map entry");

        Ok(entry
            .certificates
            .into_iter()
            .filter(|previous| previous != certificate)
            .collect())
    }

    async fn delete_orphan(&self, name: &str) -> Result<()> {
        let Some(existing) = self.client.get_certificate(name).await? else {
            return Ok(());
        };
        if !is_managed(&existing.labels) {
            warn!(
                certificate = name,
                "Unbound certificate is not managed by tls-secrets-sync, keeping it"
            );
            return Ok(());
        }

        info!(certificate = name, "Start deleting certificate");
        self.client.delete_certificate(name).await?;
        info!(certificate = name, "Complete deleting certificate");
        Ok(())
    }
}

#[async_trait]
impl Syncer for CertificateManagerSyncer {
    fn name(&self) -> &'static str {
        "certificate-manager"
    }

    async fn sync(&self, credential: &Credential) -> Result<()> {
        let certificate_id = certificate_id(&self.certificate_name_prefix, credential.certificate());
        let span = info_span!(
            "gcp.certificate_manager.sync",
            certificate.id = %certificate_id,
            map = %self.certificate_map_name,
            map.entry = %self.certificate_map_entry_name
        );

        async move {
            let current = self
                .client
                .get_map_entry(&self.certificate_map_name, &self.certificate_map_entry_name)
                .await?;
            // An entry someone else owns gets nothing created for it
            if current.as_ref().is_some_and(|entry| !is_managed(&entry.labels)) {
                warn!(
                    entry = %self.certificate_map_entry_name,
                    "Certificate map entry is not managed by tls-secrets-sync, skipping"
                );
                return Ok(());
            }

            self.ensure_certificate(&certificate_id, credential).await?;

            let certificate = self.client.certificate_name(&certificate_id);
            let orphans = self.bind_map_entry(current, &certificate).await?;

            // Only after the entry no longer references them
            for orphan in &orphans {
                self.delete_orphan(orphan).await?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
