//! # Sync Configuration
//!
//! Validated run configuration built from the command line.
//!
//! Validation runs before any client is constructed; an invalid combination
//! of flags is a startup error and the loop never starts.

use crate::cli::Cli;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{flag} is required if {condition}")]
    MissingFlag {
        flag: &'static str,
        condition: &'static str,
    },
    #[error("invalid value for source-type: {0}")]
    InvalidSourceType(String),
    #[error("invalid value for sync-type: {0}")]
    InvalidSyncType(String),
    #[error("invalid value for metrics-listen: {0} has no port")]
    MissingListenPort(String),
    #[error("invalid value for metrics-listen: {value}")]
    InvalidListenPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Where the credential is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Kubernetes {
        namespace: String,
        secret_name: String,
    },
    SecretManager(SecretManagerConfig),
}

/// Where the credential is written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetConfig {
    Kubernetes { secret_name: String },
    SecretManager(SecretManagerConfig),
    CertificateManager(CertificateManagerConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretManagerConfig {
    pub project_id: String,
    pub cert_secret: String,
    pub key_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateManagerConfig {
    pub host_name: String,
    pub project_id: String,
    pub location: String,
    pub certificate_name_prefix: String,
    pub certificate_map: String,
    pub certificate_map_entry: String,
}

/// Complete, validated configuration of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub source: SourceConfig,
    /// Sync targets in the order they are driven each iteration
    pub targets: Vec<TargetConfig>,
    /// `host:port` for the metrics server; the host may be a name
    pub metrics_listen: String,
}

impl SyncConfig {
    /// Validate parsed flags
    ///
    /// # Errors
    /// Returns the first missing or invalid flag.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let source = match cli.source_type.as_str() {
            "kubernetes" => SourceConfig::Kubernetes {
                namespace: required(
                    cli.source_namespace.as_ref(),
                    "source-namespace",
                    "source-type is kubernetes",
                )?,
                secret_name: required(
                    cli.secret_name.as_ref(),
                    "secret-name",
                    "source-type is kubernetes",
                )?,
            },
            "secret-manager" => SourceConfig::SecretManager(secret_manager_config(cli)?),
            other => return Err(ConfigError::InvalidSourceType(other.to_string())),
        };

        let targets = cli
            .sync_types
            .iter()
            .map(|sync_type| target_config(cli, sync_type))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source,
            targets,
            metrics_listen: parse_listen_address(&cli.metrics_listen)?,
        })
    }
}

fn target_config(cli: &Cli, sync_type: &str) -> Result<TargetConfig, ConfigError> {
    match sync_type {
        "kubernetes" => Ok(TargetConfig::Kubernetes {
            secret_name: required(
                cli.secret_name.as_ref(),
                "secret-name",
                "sync type has kubernetes",
            )?,
        }),
        "secret-manager" => Ok(TargetConfig::SecretManager(secret_manager_config(cli)?)),
        "certificate-manager" => {
            const CONDITION: &str = "sync type has certificate-manager";
            Ok(TargetConfig::CertificateManager(CertificateManagerConfig {
                host_name: required(
                    cli.certificate_manager_host_name.as_ref(),
                    "certificate-manager-host-name",
                    CONDITION,
                )?,
                project_id: required(
                    cli.certificate_manager_gcp_project.as_ref(),
                    "certificate-manager-gcp-project",
                    CONDITION,
                )?,
                location: required(
                    Some(&cli.certificate_manager_location),
                    "certificate-manager-location",
                    CONDITION,
                )?,
                certificate_name_prefix: required(
                    cli.certificate_manager_name_prefix.as_ref(),
                    "certificate-manager-name-prefix",
                    CONDITION,
                )?,
                certificate_map: required(
                    cli.certificate_manager_certificate_map.as_ref(),
                    "certificate-manager-certificate-map",
                    CONDITION,
                )?,
                certificate_map_entry: required(
                    cli.certificate_manager_certificate_map_entry.as_ref(),
                    "certificate-manager-certificate-map-entry",
                    CONDITION,
                )?,
            }))
        }
        other => Err(ConfigError::InvalidSyncType(other.to_string())),
    }
}

fn secret_manager_config(cli: &Cli) -> Result<SecretManagerConfig, ConfigError> {
    const CONDITION: &str = "source / sync type has secret-manager";
    Ok(SecretManagerConfig {
        project_id: required(
            cli.secret_manager_gcp_project.as_ref(),
            "secret-manager-gcp-project",
            CONDITION,
        )?,
        cert_secret: required(cli.cert_secret.as_ref(), "cert-secret", CONDITION)?,
        key_secret: required(cli.key_secret.as_ref(), "key-secret", CONDITION)?,
    })
}

fn required(
    value: Option<&String>,
    flag: &'static str,
    condition: &'static str,
) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::MissingFlag { flag, condition }),
    }
}

/// Validate a `host:port` listen address; a bare `:port` binds every interface
///
/// The host is resolved when the server binds, so names like `localhost` work.
///
/// # Errors
/// Returns [`ConfigError::MissingListenPort`] or [`ConfigError::InvalidListenPort`]
/// if the port part is absent or not a number.
pub fn parse_listen_address(value: &str) -> Result<String, ConfigError> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::MissingListenPort(value.to_string()))?;
    let port: u16 = port.parse().map_err(|source| ConfigError::InvalidListenPort {
        value: value.to_string(),
        source,
    })?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}
