//! # Reconciler
//!
//! The polling loop that keeps every sync target at the source credential.
//!
//! ## Iteration Flow
//!
//! 1. Fetch the credential from the source once
//! 2. On fetch failure, record the iteration as failed and skip all targets
//! 3. Otherwise drive every target in configured order; a failing target
//!    does not stop the ones after it
//! 4. Increment exactly one outcome counter
//!
//! Iterations are strictly sequential. Shutdown is observed between
//! iterations only, so an in-flight iteration always runs to completion.

use crate::constants::SYNC_INTERVAL;
use crate::observability::metrics::SyncMetrics;
use crate::provider::{Fetcher, Syncer};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};

pub struct SyncLoop {
    fetcher: Box<dyn Fetcher>,
    syncers: Vec<Box<dyn Syncer>>,
    metrics: SyncMetrics,
    interval: Duration,
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field(
                "syncers",
                &self.syncers.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl SyncLoop {
    #[must_use]
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        syncers: Vec<Box<dyn Syncer>>,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            fetcher,
            syncers,
            metrics,
            interval: SYNC_INTERVAL,
        }
    }

    /// Override the time between iterations
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a single iteration and record its outcome
    ///
    /// Returns true if the fetch and every target succeeded.
    pub async fn run_once(&self) -> bool {
        let start = Instant::now();
        let succeeded = self
            .iterate()
            .instrument(info_span!("sync.iteration"))
            .await;
        self.metrics.observe_duration(start.elapsed().as_secs_f64());

        if succeeded {
            self.metrics.record_success();
            info!("Sync iteration succeeded");
        } else {
            self.metrics.record_error();
            error!("Sync iteration failed");
        }
        succeeded
    }

    async fn iterate(&self) -> bool {
        info!(targets = self.syncers.len(), "Starting sync iteration");

        let credential = match self.fetcher.fetch().await {
            Ok(credential) => credential,
            Err(e) => {
                error!("Failed to fetch credential: {:#}", e);
                return false;
            }
        };

        let mut all_succeeded = true;
        for syncer in &self.syncers {
            if let Err(e) = syncer.sync(&credential).await {
                error!(syncer = syncer.name(), "Failed to sync: {:#}", e);
                all_succeeded = false;
            }
        }
        all_succeeded
    }

    /// Iterate immediately, then once per interval, until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping sync loop");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.run_once().await;
        }
    }
}
