//! # GCP REST Client
//!
//! Thin REST plumbing shared by the Secret Manager and Certificate Manager
//! adapters: base URL handling, bearer authentication and error mapping.
//!
//! References:
//! - [GCP API error model](https://cloud.google.com/apis/design/errors)

use super::auth::TokenSource;
use anyhow::{Context, Result};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Failure reported by a GCP REST API
#[derive(Debug, Error)]
pub enum GcpApiError {
    /// The addressed resource does not exist
    #[error("GCP API resource not found: {message}")]
    NotFound { message: String },
    #[error("GCP API error: {message} (code: {code}, status: {status})")]
    Api {
        code: u16,
        status: String,
        message: String,
    },
    /// Error body was not in the GCP error format
    #[error("HTTP {code}: {body}")]
    Http { code: u16, body: String },
}

impl GcpApiError {
    /// Map an unsuccessful HTTP response onto the error taxonomy
    #[must_use]
    pub fn from_response(status: StatusCode, body: String) -> Self {
        let parsed = serde_json::from_str::<GcpErrorResponse>(&body).ok();

        if status == StatusCode::NOT_FOUND {
            let message = parsed.map_or(body, |response| response.error.message);
            return Self::NotFound { message };
        }

        match parsed {
            Some(response) => Self::Api {
                code: response.error.code,
                status: response.error.status,
                message: response.error.message,
            },
            None => Self::Http {
                code: status.as_u16(),
                body,
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// GCP API error response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct GcpErrorResponse {
    pub error: GcpErrorBody,
}

/// Detailed error information from GCP API
#[derive(Debug, Serialize, Deserialize)]
pub struct GcpErrorBody {
    /// HTTP status code (e.g., 404, 403, 500)
    pub code: u16,
    pub message: String,
    /// Error status string (e.g., "NOT_FOUND", "PERMISSION_DENIED")
    #[serde(default)]
    pub status: String,
}

/// Authenticated client for one GCP REST service
#[derive(Clone)]
pub struct GcpRestClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<TokenSource>,
}

impl std::fmt::Debug for GcpRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpRestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GcpRestClient {
    #[must_use]
    pub fn new(http_client: Client, base_url: impl Into<String>, tokens: Arc<TokenSource>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            tokens,
        }
    }

    /// Build a client whose endpoint may be overridden by `endpoint_env`
    #[must_use]
    pub fn from_env(
        http_client: Client,
        endpoint_env: &str,
        default_endpoint: &str,
        tokens: Arc<TokenSource>,
    ) -> Self {
        let base_url = match std::env::var(endpoint_env) {
            Ok(endpoint) if !endpoint.is_empty() => {
                info!("{} override: using endpoint {}", endpoint_env, endpoint);
                endpoint
            }
            _ => default_endpoint.to_string(),
        };
        Self::new(http_client, base_url, tokens)
    }

    /// Send an authenticated request to `{base_url}/v1/{path}`
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response> {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%method, url = %url, "GCP request");

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Authorization", self.tokens.authorization().await?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))
    }

    /// Issue a request and decode a successful JSON response
    ///
    /// Unsuccessful responses are returned as [`GcpApiError`] inside the
    /// `anyhow` chain so callers can downcast for not-found.
    pub async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, query, body).await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GcpApiError::from_response(status, error_text).into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }

    /// GET a resource, mapping not-found to `None`
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.call::<(), T>(Method::GET, path, &[], None).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Returns true if the error chain carries a GCP not-found
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<GcpApiError>()
        .is_some_and(GcpApiError::is_not_found)
}
