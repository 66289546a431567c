//! # Kubernetes Secrets
//!
//! Cluster-secret adapter.
//!
//! As a source it reads one TLS secret from a fixed namespace. As a target it
//! fans the credential out to every namespace whose opt-in annotation lists the
//! secret name, and tears the secret down again when a namespace opts out.
//!
//! Secrets that exist but were not written by this process (missing or
//! different ownership annotation) are never touched.

use crate::constants::{ANNOTATION_KEY, SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crate::provider::{Credential, Fetcher, Syncer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};

/// Returns true when a Kubernetes API error means the object does not exist
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(api_err) if api_err.code == 404)
}

/// Returns true if `secret_name` appears in a comma separated opt-in list
pub fn is_opted_in(annotation_value: Option<&str>, secret_name: &str) -> bool {
    annotation_value.is_some_and(|list| list.split(',').any(|entry| entry.trim() == secret_name))
}

/// Returns true if the secret carries our ownership annotation for `secret_name`
pub fn is_managed(secret: &Secret, secret_name: &str) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_KEY))
        .is_some_and(|owner| owner == secret_name)
}

/// What to do with one namespace's copy of the secret
#[derive(Debug, Clone, PartialEq)]
pub enum SecretAction {
    Create,
    /// Rewrite the payload of the secret that was read
    Update(Box<Secret>),
    Delete,
    Unchanged,
    /// Secret exists but is not ours
    SkipUnmanaged,
    /// Namespace has not opted in and holds no secret
    NotRequested,
}

/// Decide the action for one namespace
pub fn plan_secret_action(
    opted_in: bool,
    existing: Option<Secret>,
    secret_name: &str,
    credential: &Credential,
) -> SecretAction {
    let Some(secret) = existing else {
        return if opted_in {
            SecretAction::Create
        } else {
            SecretAction::NotRequested
        };
    };

    if !is_managed(&secret, secret_name) {
        return SecretAction::SkipUnmanaged;
    }
    if !opted_in {
        return SecretAction::Delete;
    }

    if data_field(&secret, TLS_CERT_KEY) == Some(credential.certificate())
        && data_field(&secret, TLS_PRIVATE_KEY_KEY) == Some(credential.private_key())
    {
        SecretAction::Unchanged
    } else {
        SecretAction::Update(Box::new(secret))
    }
}

fn data_field<'a>(secret: &'a Secret, field: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .map(|value| value.0.as_slice())
}

fn tls_data(credential: &Credential) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (
            TLS_CERT_KEY.to_string(),
            ByteString(credential.certificate().to_vec()),
        ),
        (
            TLS_PRIVATE_KEY_KEY.to_string(),
            ByteString(credential.private_key().to_vec()),
        ),
    ])
}

/// Syncs the credential into every opted-in namespace of the cluster
#[derive(Clone)]
pub struct KubernetesSyncer {
    client: Client,
    secret_name: String,
}

impl std::fmt::Debug for KubernetesSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesSyncer")
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

impl KubernetesSyncer {
    #[must_use]
    pub fn new(client: Client, secret_name: impl Into<String>) -> Self {
        Self {
            client,
            secret_name: secret_name.into(),
        }
    }

    async fn sync_namespace(&self, namespace: &Namespace, credential: &Credential) -> Result<()> {
        let ns_name = namespace.metadata.name.as_deref().unwrap_or_default();
        let opted_in = is_opted_in(
            namespace
                .metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(ANNOTATION_KEY))
                .map(String::as_str),
            &self.secret_name,
        );

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), ns_name);
        let existing = match secrets.get(&self.secret_name).await {
            Ok(secret) => Some(secret),
            Err(e) if is_not_found(&e) => None,
            Err(e) => {
                return Err(e).context(format!(
                    "get secret {}/{}",
                    ns_name, self.secret_name
                ))
            }
        };

        match plan_secret_action(opted_in, existing, &self.secret_name, credential) {
            SecretAction::Create => {
                info!(namespace = ns_name, secret = %self.secret_name, "Creating secret");
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(self.secret_name.clone()),
                        annotations: Some(BTreeMap::from([(
                            ANNOTATION_KEY.to_string(),
                            self.secret_name.clone(),
                        )])),
                        ..ObjectMeta::default()
                    },
                    type_: Some(SECRET_TYPE_TLS.to_string()),
                    data: Some(tls_data(credential)),
                    ..Secret::default()
                };
                secrets
                    .create(&PostParams::default(), &secret)
                    .await
                    .context(format!("create secret {}/{}", ns_name, self.secret_name))?;
            }
            SecretAction::Update(mut secret) => {
                info!(namespace = ns_name, secret = %self.secret_name, "Updating secret");
                let data = secret.data.get_or_insert_with(BTreeMap::new);
                data.extend(tls_data(credential));
                secrets
                    .replace(&self.secret_name, &PostParams::default(), &*secret)
                    .await
                    .context(format!("update secret {}/{}", ns_name, self.secret_name))?;
            }
            SecretAction::Delete => {
                info!(namespace = ns_name, secret = %self.secret_name, "Removing secret");
                secrets
                    .delete(&self.secret_name, &DeleteParams::default())
                    .await
                    .context(format!("delete secret {}/{}", ns_name, self.secret_name))?;
            }
            SecretAction::SkipUnmanaged => {
                debug!(
                    namespace = ns_name,
                    secret = %self.secret_name,
                    "Secret is not managed by tls-secrets-sync, skipping"
                );
            }
            SecretAction::Unchanged | SecretAction::NotRequested => {}
        }

        Ok(())
    }
}

#[async_trait]
impl Syncer for KubernetesSyncer {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn sync(&self, credential: &Credential) -> Result<()> {
        let span = info_span!("kubernetes.secret.sync", secret.name = %self.secret_name);
        async move {
            let namespaces: Api<Namespace> = Api::all(self.client.clone());
            let namespaces = namespaces
                .list(&ListParams::default())
                .await
                .context("list namespaces")?;

            for namespace in &namespaces.items {
                self.sync_namespace(namespace, credential).await?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Reads the credential from one secret in a fixed namespace
#[derive(Clone)]
pub struct KubernetesFetcher {
    client: Client,
    namespace: String,
    secret_name: String,
}

impl std::fmt::Debug for KubernetesFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesFetcher")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

impl KubernetesFetcher {
    #[must_use]
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            secret_name: secret_name.into(),
        }
    }
}

#[async_trait]
impl Fetcher for KubernetesFetcher {
    async fn fetch(&self) -> Result<Credential> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret = secrets
            .get(&self.secret_name)
            .await
            .context(format!("get secret {}/{}", self.namespace, self.secret_name))?;

        let field = |key: &str| {
            data_field(&secret, key).map(<[u8]>::to_vec).with_context(|| {
                format!(
                    "secret {}/{} has no {} field",
                    self.namespace, self.secret_name, key
                )
            })
        };

        Ok(Credential::new(
            field(TLS_CERT_KEY)?,
            field(TLS_PRIVATE_KEY_KEY)?,
        ))
    }
}
