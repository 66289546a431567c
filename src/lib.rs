//! TLS Secret Sync Library
//!
//! Keeps one TLS certificate/key pair consistent across Kubernetes secrets,
//! GCP Secret Manager and GCP Certificate Manager.
//! Tests are included in the module files and under `tests/`.

pub mod cli;
pub mod config;
pub mod constants;
pub mod observability;
pub mod provider;
pub mod reconciler;
pub mod server;
