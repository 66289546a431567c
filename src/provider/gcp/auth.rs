//! # GCP Access Tokens
//!
//! OAuth2 bearer tokens for the GCP REST clients.
//!
//! Supports:
//! - Static token from `GCP_ACCESS_TOKEN` (local runs and test servers)
//! - Metadata server (Workload Identity) - for GKE/GCE
//!
//! Metadata-server tokens are cached and refreshed shortly before they expire,
//! since one process outlives many tokens.

use crate::constants::{METADATA_TOKEN_URL, TOKEN_REFRESH_MARGIN};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// OAuth2 access token response from the GCP metadata server
///
/// Endpoint: `http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token expiration time in seconds
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

enum TokenKind {
    /// Fixed token, never refreshed
    Static(String),
    /// Workload Identity via the metadata server
    Metadata {
        http_client: Client,
        cached: Mutex<Option<CachedToken>>,
    },
}

/// Source of bearer tokens shared by every GCP client
pub struct TokenSource {
    kind: TokenKind,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            TokenKind::Static(_) => "static",
            TokenKind::Metadata { .. } => "metadata",
        };
        f.debug_struct("TokenSource")
            .field("kind", &kind)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    /// `GCP_ACCESS_TOKEN` if set, otherwise the metadata server
    #[must_use]
    pub fn from_env(http_client: Client) -> Self {
        match std::env::var("GCP_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => {
                info!("Using static GCP access token from GCP_ACCESS_TOKEN");
                Self::fixed(token)
            }
            _ => {
                info!("Using Workload Identity authentication (metadata server)");
                Self {
                    kind: TokenKind::Metadata {
                        http_client,
                        cached: Mutex::new(None),
                    },
                }
            }
        }
    }

    /// A token that is used as-is for the lifetime of the process
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Static(token.into()),
        }
    }

    /// Current token, formatted as an `Authorization` header value
    pub async fn authorization(&self) -> Result<String> {
        let token = match &self.kind {
            TokenKind::Static(token) => token.clone(),
            TokenKind::Metadata {
                http_client,
                cached,
            } => {
                let mut cached = cached.lock().await;
                match cached.as_ref() {
                    Some(token) if Instant::now() < token.refresh_at => token.value.clone(),
                    _ => {
                        let fresh = fetch_metadata_token(http_client).await?;
                        let value = fresh.value.clone();
                        *cached = Some(fresh);
                        value
                    }
                }
            }
        };

        if token.starts_with("Bearer ") {
            Ok(token)
        } else {
            Ok(format!("Bearer {token}"))
        }
    }
}

async fn fetch_metadata_token(http_client: &Client) -> Result<CachedToken> {
    let response = http_client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context("Metadata server not available; run on GKE/GCE with Workload Identity or set GCP_ACCESS_TOKEN")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Metadata server returned status {status}: {body}");
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response from metadata server")?;
    debug!(expires_in = token.expires_in, "Retrieved access token from metadata server");

    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
    Ok(CachedToken {
        value: token.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}
