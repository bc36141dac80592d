//! Job Scheduler Module
//!
//! Arms and cancels durable timers. A job is just a row in the registry: it
//! survives restarts and is fired by the [`Dispatcher`](super::Dispatcher)
//! once its time has come.

use crate::error::Result;
use crate::registry::Registry;
use crate::types::{JobId, JobKind, ScheduledJob};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of cancelling a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already fired, already cancelled or never existed
    NotFound,
}

/// Handle for arming and cancelling scheduled jobs
#[derive(Clone)]
pub struct JobScheduler {
    registry: Arc<Registry>,
}

impl JobScheduler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Persist a job that fires at `fire_at`
    ///
    /// # Arguments
    /// * `kind` - Which handler runs when the job fires
    /// * `fire_at` - Earliest firing time
    /// * `payload` - Record ids the handler needs, serialized to JSON
    ///
    /// # Returns
    /// The id used to cancel the job later
    pub async fn schedule<P: Serialize>(
        &self,
        kind: JobKind,
        fire_at: DateTime<Utc>,
        payload: &P,
    ) -> Result<JobId> {
        let job = ScheduledJob {
            id: JobId::generate(),
            kind,
            fire_at,
            payload: serde_json::to_value(payload)?,
            lease_until: None,
            created_at: Utc::now(),
        };
        self.registry.insert_job(&job).await?;
        debug!("Scheduled {} job {} for {}", kind, job.id, fire_at);
        Ok(job.id)
    }

    /// Remove a job before it fires
    ///
    /// Cancelling something that no longer exists is not an error. Store
    /// failures are logged and reported as `NotFound`: every handler re-checks
    /// the state it acts on, so a job that survives a failed cancel is a no-op.
    pub async fn cancel(&self, id: &JobId) -> CancelOutcome {
        match self.registry.delete_job(id).await {
            Ok(true) => {
                debug!("Cancelled job {}", id);
                CancelOutcome::Cancelled
            }
            Ok(false) => CancelOutcome::NotFound,
            Err(e) => {
                warn!("Failed to cancel job {}: {}", id, e);
                CancelOutcome::NotFound
            }
        }
    }
}
