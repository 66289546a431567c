//! # Constants
//!
//! Shared constants used throughout the sync process.
//!
//! The ownership markers must stay identical across every backend so that a
//! resource written by one release is recognised as managed by the next.

use std::time::Duration;

/// Annotation key carrying ownership and opt-in information in the cluster.
///
/// On a namespace the value is a comma separated list of secret names the
/// namespace opts into. On a secret the value is the secret's own name.
pub const ANNOTATION_KEY: &str = "tls-secrets-sync.argentumcode.co.jp";

/// Label key stamped on GCP resources created by this process
///
/// GCP label keys cannot contain dots, so the cluster annotation key is not
/// reusable here.
pub const MANAGED_BY_LABEL_KEY: &str = "managed-by";

/// Label value paired with [`MANAGED_BY_LABEL_KEY`]
pub const MANAGED_BY_LABEL_VALUE: &str = "tls-secrets-sync";

/// Secret data field holding the PEM certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret data field holding the PEM private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Kubernetes secret type for TLS material
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// Time between two reconciliation iterations
pub const SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Number of leading SHA-256 bytes used in a certificate identity
pub const CERTIFICATE_HASH_BYTES: usize = 4;

/// Delay between two polls of a long-running GCP operation
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on how long a single long-running GCP operation may take
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Refresh metadata-server tokens this long before they expire
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Default listen address for the metrics server
pub const DEFAULT_METRICS_LISTEN: &str = ":9090";

/// Default Certificate Manager location
pub const DEFAULT_CERTIFICATE_MANAGER_LOCATION: &str = "global";

/// Default GCP Secret Manager REST endpoint
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// Default GCP Certificate Manager REST endpoint
pub const DEFAULT_CERTIFICATE_MANAGER_ENDPOINT: &str = "https://certificatemanager.googleapis.com";

/// GCE metadata server token endpoint (Workload Identity)
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
