//! Periodic triggers for the scan and the standalone deep discovery.
//!
//! Two independent repeating jobs; a settings write re-arms both
//! atomically. Ticks that land while the previous run is still in flight
//! are skipped silently — the singleton, not the timer, owns exclusivity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::engine::ScanEngine;
use crate::server::error::Error;
use crate::store::Store;

pub struct Scheduler {
    scheduler: JobScheduler,
    engine: Arc<ScanEngine>,
    store: Store,
    scan_job: RwLock<Option<Uuid>>,
    discovery_job: RwLock<Option<Uuid>>,
}

impl Scheduler {
    pub async fn new(store: Store, engine: Arc<ScanEngine>) -> Result<Arc<Self>, Error> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Config(format!("scheduler init: {}", e)))?;
        Ok(Arc::new(Self {
            scheduler,
            engine,
            store,
            scan_job: RwLock::new(None),
            discovery_job: RwLock::new(None),
        }))
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        self.reload().await?;
        self.scheduler
            .start()
            .await
            .map_err(|e| Error::Config(format!("scheduler start: {}", e)))?;
        Ok(())
    }

    /// Re-arm both timers from current settings. Called at startup and
    /// after every successful settings write.
    pub async fn reload(self: &Arc<Self>) -> Result<(), Error> {
        self.rearm_scan().await?;
        self.rearm_discovery().await?;
        Ok(())
    }

    async fn rearm_scan(self: &Arc<Self>) -> Result<(), Error> {
        let mut slot = self.scan_job.write().await;
        if let Some(old) = slot.take() {
            let _ = self.scheduler.remove(&old).await;
        }

        if !self.store.scan_enabled().await? {
            tracing::info!("scheduled scans disabled");
            return Ok(());
        }

        let minutes = self.store.scan_interval_minutes().await?;
        let engine = self.engine.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(u64::from(minutes) * 60),
            move |_id, _scheduler| {
                let engine = engine.clone();
                Box::pin(async move {
                    match engine.start_scan().await {
                        Ok(scan) => tracing::info!("scheduled scan {} started", scan.id),
                        Err(Error::SingletonBusy(_)) => {
                            tracing::info!("scan tick skipped, previous scan still running");
                        }
                        Err(e) => tracing::error!("scheduled scan failed to start: {}", e),
                    }
                })
            },
        )
        .map_err(|e| Error::Config(format!("scan job: {}", e)))?;

        let id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| Error::Config(format!("scan job add: {}", e)))?;
        *slot = Some(id);
        tracing::info!("scan scheduled every {} minutes", minutes);
        Ok(())
    }

    async fn rearm_discovery(self: &Arc<Self>) -> Result<(), Error> {
        let mut slot = self.discovery_job.write().await;
        if let Some(old) = slot.take() {
            let _ = self.scheduler.remove(&old).await;
        }

        if !self.store.deep_discovery_enabled().await? {
            tracing::info!("scheduled deep discovery disabled");
            return Ok(());
        }

        let minutes = self.store.deep_discovery_interval_minutes().await?;
        let engine = self.engine.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(u64::from(minutes) * 60),
            move |_id, _scheduler| {
                let engine = engine.clone();
                Box::pin(async move {
                    match engine.start_discovery().await {
                        Ok(()) => tracing::info!("scheduled deep discovery started"),
                        Err(Error::SingletonBusy(_)) => {
                            tracing::info!("discovery tick skipped, previous run still active");
                        }
                        Err(e) => tracing::error!("scheduled discovery failed to start: {}", e),
                    }
                })
            },
        )
        .map_err(|e| Error::Config(format!("discovery job: {}", e)))?;

        let id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| Error::Config(format!("discovery job add: {}", e)))?;
        *slot = Some(id);
        tracing::info!("deep discovery scheduled every {} minutes", minutes);
        Ok(())
    }

    pub async fn shutdown(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("scheduler shutdown: {}", e);
        }
    }
}
