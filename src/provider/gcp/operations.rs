//! # Long-Running Operations
//!
//! Certificate Manager mutations return a `google.longrunning.Operation`.
//! Callers submit the mutation and then block here until it settles, so a
//! single sync never has two mutations in flight.

use super::client::GcpRestClient;
use crate::constants::{OPERATION_POLL_INTERVAL, OPERATION_TIMEOUT};
use anyhow::{Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Long-running operation resource
///
/// API Reference: https://cloud.google.com/certificate-manager/docs/reference/certificate-manager/rest/v1/projects.locations.operations#Operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Full resource name, `projects/*/locations/*/operations/*`
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
}

/// `google.rpc.Status` carried by a failed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation {name} failed: {message} (code: {code})")]
    Failed {
        name: String,
        code: i32,
        message: String,
    },
    #[error("timed out waiting for operation {name}")]
    TimedOut { name: String },
}

/// Poll `operation` until it is done, failing if it settles with an error
pub async fn wait_for_operation(client: &GcpRestClient, operation: Operation) -> Result<Operation> {
    let deadline = Instant::now() + OPERATION_TIMEOUT;
    let mut current = operation;

    loop {
        if current.done {
            if let Some(status) = current.error {
                return Err(OperationError::Failed {
                    name: current.name,
                    code: status.code,
                    message: status.message,
                }
                .into());
            }
            return Ok(current);
        }

        if Instant::now() >= deadline {
            return Err(OperationError::TimedOut { name: current.name }.into());
        }

        let name = current.name;
        debug!(operation = %name, "Operation still running");
        tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
        current = client
            .call::<(), Operation>(Method::GET, &name, &[], None)
            .await
            .with_context(|| format!("poll operation {name}"))?;
    }
}
