//! Job Dispatcher Module
//!
//! Background loop that fires due jobs.
//!
//! # Tick Flow
//! 1. Lease up to `batch_limit` due jobs (conditional update per job)
//! 2. Run the handler for each leased job
//! 3. Delete the job whether the handler succeeded or not
//! 4. Purge sessions whose inactivity TTL has elapsed
//!
//! A dispatcher that dies between steps 2 and 3 leaves the job leased; once
//! the lease runs out the job fires again. Handlers are written to tolerate
//! that: each re-reads the record it acts on and does nothing if the record
//! moved on.

use super::policies::{Lateness, MisfirePolicy};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::registry::Registry;
use crate::types::ScheduledJob;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Code that runs when a job fires
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ScheduledJob) -> Result<()>;
}

/// What one dispatcher pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs whose handler returned Ok
    pub fired: usize,
    /// Jobs whose handler returned an error (still consumed)
    pub failed: usize,
    pub purged_sessions: u64,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    handler: Arc<dyn JobHandler>,
    misfire: MisfirePolicy,
    poll_interval: std::time::Duration,
    lease: Duration,
    batch_limit: u32,
}

impl Dispatcher {
    /// Creates a dispatcher over the jobs stored in `registry`
    ///
    /// # Arguments
    /// * `registry` - Store holding the scheduled jobs
    /// * `handler` - Runs each fired job
    /// * `config` - Poll interval, lease length, misfire grace and batch size
    pub fn new(
        registry: Arc<Registry>,
        handler: Arc<dyn JobHandler>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            handler,
            misfire: MisfirePolicy::new(config.misfire_grace()),
            poll_interval: config.poll_interval(),
            lease: config.lease(),
            batch_limit: config.batch_limit.max(1),
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// The first tick runs immediately, so jobs that came due while the
    /// process was down fire right after startup.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Job dispatcher starting (poll_interval_ms={}, lease_secs={})",
            self.poll_interval.as_millis(),
            self.lease.num_seconds()
        );

        loop {
            match self.tick(Utc::now()).await {
                Ok(report) if report.fired + report.failed > 0 => {
                    debug!(
                        "Dispatcher tick: {} fired, {} failed, {} sessions purged",
                        report.fired, report.failed, report.purged_sessions
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Dispatcher tick failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Job dispatcher stopped");
    }

    /// One pass over the due jobs as of `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let jobs = self
            .registry
            .lease_due_jobs(now, now + self.lease, self.batch_limit)
            .await?;

        for job in jobs {
            let late_ms = (now - job.fire_at).num_milliseconds().max(0);
            match self.misfire.classify(job.fire_at, now) {
                Lateness::WithinGrace => {
                    debug!("Firing job {} ({}), {}ms late", job.id, job.kind, late_ms)
                }
                Lateness::BeyondGrace => warn!(
                    "Job {} ({}) misfired: due {}, firing {}ms late",
                    job.id, job.kind, job.fire_at, late_ms
                ),
            }

            match self.handler.handle(&job).await {
                Ok(()) => report.fired += 1,
                Err(e) => {
                    error!("Job {} ({}) failed: {}", job.id, job.kind, e);
                    report.failed += 1;
                }
            }

            if let Err(e) = self.registry.delete_job(&job.id).await {
                warn!("Failed to consume job {}: {}", job.id, e);
            }
        }

        report.purged_sessions = self.registry.purge_expired_sessions(now).await?;
        if report.purged_sessions > 0 {
            debug!("Purged {} expired sessions", report.purged_sessions);
        }
        Ok(report)
    }
}
