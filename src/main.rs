//! # TLS Secret Sync
//!
//! Keeps a TLS certificate/key pair in sync between Kubernetes secrets, GCP
//! Secret Manager and GCP Certificate Manager.
//!
//! ## Overview
//!
//! Once per hour the process:
//!
//! 1. **Fetches the credential** from the configured source (a cluster secret
//!    or two Secret Manager secrets)
//! 2. **Syncs every target** in order: opted-in namespaces, Secret Manager
//!    versions, or a Certificate Manager map entry
//! 3. **Records the outcome** in Prometheus counters served on `/metrics`
//!
//! ## Usage
//!
//! See [`tls_secret_sync::cli`] for the flag reference.

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use tls_secret_sync::cli::Cli;
use tls_secret_sync::config::{SourceConfig, SyncConfig, TargetConfig};
use tls_secret_sync::constants::{
    DEFAULT_CERTIFICATE_MANAGER_ENDPOINT, DEFAULT_SECRET_MANAGER_ENDPOINT,
};
use tls_secret_sync::observability::metrics::{SyncMetrics, REGISTRY};
use tls_secret_sync::provider::gcp::auth::TokenSource;
use tls_secret_sync::provider::gcp::certificate_manager::{
    CertificateManagerREST, CertificateManagerSyncer,
};
use tls_secret_sync::provider::gcp::client::GcpRestClient;
use tls_secret_sync::provider::gcp::secret_manager::{
    SecretManagerFetcher, SecretManagerREST, SecretManagerSyncer,
};
use tls_secret_sync::provider::kubernetes::{KubernetesFetcher, KubernetesSyncer};
use tls_secret_sync::provider::{Fetcher, Syncer};
use tls_secret_sync::reconciler::SyncLoop;
use tls_secret_sync::server::{start_server, ServerState};
use tracing::{error, info, warn};

/// Backend clients, each built at most once and shared by every adapter
struct Clients {
    kube: Option<Client>,
    secret_manager: GcpRestClient,
    certificate_manager: GcpRestClient,
}

impl Clients {
    fn new() -> Self {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenSource::from_env(http.clone()));
        let secret_manager = GcpRestClient::from_env(
            http.clone(),
            "SECRET_MANAGER_ENDPOINT",
            DEFAULT_SECRET_MANAGER_ENDPOINT,
            Arc::clone(&tokens),
        );
        let certificate_manager = GcpRestClient::from_env(
            http.clone(),
            "CERTIFICATE_MANAGER_ENDPOINT",
            DEFAULT_CERTIFICATE_MANAGER_ENDPOINT,
            Arc::clone(&tokens),
        );
        Self {
            kube: None,
            secret_manager,
            certificate_manager,
        }
    }

    async fn kube(&mut self) -> Result<Client> {
        if let Some(client) = &self.kube {
            return Ok(client.clone());
        }
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        self.kube = Some(client.clone());
        Ok(client)
    }
}

async fn build_fetcher(source: &SourceConfig, clients: &mut Clients) -> Result<Box<dyn Fetcher>> {
    Ok(match source {
        SourceConfig::Kubernetes {
            namespace,
            secret_name,
        } => Box::new(KubernetesFetcher::new(
            clients.kube().await?,
            namespace,
            secret_name,
        )),
        SourceConfig::SecretManager(sm) => Box::new(SecretManagerFetcher::new(
            SecretManagerREST::new(clients.secret_manager.clone(), &sm.project_id),
            &sm.cert_secret,
            &sm.key_secret,
        )),
    })
}

async fn build_syncer(target: &TargetConfig, clients: &mut Clients) -> Result<Box<dyn Syncer>> {
    Ok(match target {
        TargetConfig::Kubernetes { secret_name } => {
            Box::new(KubernetesSyncer::new(clients.kube().await?, secret_name))
        }
        TargetConfig::SecretManager(sm) => Box::new(SecretManagerSyncer::new(
            SecretManagerREST::new(clients.secret_manager.clone(), &sm.project_id),
            &sm.cert_secret,
            &sm.key_secret,
        )),
        TargetConfig::CertificateManager(cm) => Box::new(CertificateManagerSyncer::new(
            CertificateManagerREST::new(
                clients.certificate_manager.clone(),
                &cm.project_id,
                &cm.location,
            ),
            &cm.host_name,
            &cm.certificate_name_prefix,
            &cm.certificate_map,
            &cm.certificate_map_entry,
        )),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tls_secret_sync=info".into()),
        )
        .init();

    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let cli = Cli::parse();
    let config = SyncConfig::from_cli(&cli).context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        build_time = env!("BUILD_DATETIME"),
        "Starting tls-secret-sync"
    );

    let metrics = SyncMetrics::new()?;
    metrics.register(&REGISTRY)?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let metrics_listen = config.metrics_listen.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = start_server(&metrics_listen, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut clients = Clients::new();
    let fetcher = build_fetcher(&config.source, &mut clients).await?;
    let mut syncers = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        syncers.push(build_syncer(target, &mut clients).await?);
    }
    let sync_loop = SyncLoop::new(fetcher, syncers, metrics);
    info!(?sync_loop, "Sync loop configured");

    server_state.set_ready(true);

    // A server that fails to bind ends the process
    tokio::select! {
        () = sync_loop.run(async {
            shutdown_signal().await;
            server_state.set_ready(false);
        }) => {}
        _ = server => {
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
    }

    info!("tls-secret-sync stopped");
    Ok(())
}
