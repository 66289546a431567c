//! # Command Line
//!
//! Flag surface of the `tls-secret-sync` binary.
//!
//! ## Usage
//!
//! ```bash
//! # Copy a cluster secret into every opted-in namespace
//! tls-secret-sync --source-type kubernetes --source-namespace certs \
//!     --secret-name wildcard-tls --sync-types kubernetes
//!
//! # Publish certificates kept in Secret Manager to a certificate map
//! tls-secret-sync --source-type secret-manager \
//!     --secret-manager-gcp-project my-project \
//!     --cert-secret tls-cert --key-secret tls-key \
//!     --sync-types certificate-manager \
//!     --certificate-manager-host-name '*.example.com' \
//!     --certificate-manager-gcp-project my-project \
//!     --certificate-manager-name-prefix wildcard- \
//!     --certificate-manager-certificate-map my-map \
//!     --certificate-manager-certificate-map-entry wildcard
//! ```
//!
//! Flags are only parsed here; [`crate::config::SyncConfig`] validates them.

use crate::constants::{DEFAULT_CERTIFICATE_MANAGER_LOCATION, DEFAULT_METRICS_LISTEN};
use clap::Parser;

/// Keeps a TLS certificate/key pair in sync across Kubernetes and GCP
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tls-secret-sync", version = long_version(), about, long_about = None)]
pub struct Cli {
    /// Where the credential is read from: kubernetes/secret-manager
    #[arg(long)]
    pub source_type: String,

    /// Namespace to get the TLS secret from
    #[arg(long)]
    pub source_namespace: Option<String>,

    /// Kubernetes secret name to read and/or sync
    #[arg(long)]
    pub secret_name: Option<String>,

    /// GCP project for Secret Manager
    #[arg(long)]
    pub secret_manager_gcp_project: Option<String>,

    /// Secret Manager secret holding the certificate
    #[arg(long)]
    pub cert_secret: Option<String>,

    /// Secret Manager secret holding the private key
    #[arg(long)]
    pub key_secret: Option<String>,

    /// Destinations, repeatable: kubernetes/secret-manager/certificate-manager
    #[arg(long)]
    pub sync_types: Vec<String>,

    /// Host name bound by the certificate map entry, e.g. *.example.com
    #[arg(long)]
    pub certificate_manager_host_name: Option<String>,

    /// GCP project for Certificate Manager
    #[arg(long)]
    pub certificate_manager_gcp_project: Option<String>,

    /// Location for Certificate Manager
    #[arg(long, default_value = DEFAULT_CERTIFICATE_MANAGER_LOCATION)]
    pub certificate_manager_location: String,

    /// Certificate name prefix for Certificate Manager
    #[arg(long)]
    pub certificate_manager_name_prefix: Option<String>,

    /// Certificate map name for Certificate Manager
    #[arg(long)]
    pub certificate_manager_certificate_map: Option<String>,

    /// Certificate map entry name for Certificate Manager
    #[arg(long)]
    pub certificate_manager_certificate_map_entry: Option<String>,

    /// listen address:port for the metrics server
    #[arg(long, default_value = DEFAULT_METRICS_LISTEN)]
    pub metrics_listen: String,
}

fn long_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ")")
}
