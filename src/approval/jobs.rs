//! Scheduled job handlers
//!
//! Payloads carry record ids only; each handler re-reads the record and the
//! workflow's guards turn a stale or repeated job into a no-op.

use super::workflow::ApprovalWorkflow;
use crate::error::Result;
use crate::scheduler::JobHandler;
use crate::types::{CleanupJob, JobKind, PaymentJob, ScheduledJob};
use async_trait::async_trait;

#[async_trait]
impl JobHandler for ApprovalWorkflow {
    async fn handle(&self, job: &ScheduledJob) -> Result<()> {
        match job.kind {
            JobKind::ExpireConfirmation => {
                let payload: PaymentJob = serde_json::from_value(job.payload.clone())?;
                self.expire_confirmation(&payload.payment_id).await?;
            }
            JobKind::ExpireApproval => {
                let payload: PaymentJob = serde_json::from_value(job.payload.clone())?;
                self.expire_approval(&payload.payment_id).await?;
            }
            JobKind::DeleteDelivered => {
                let payload: CleanupJob = serde_json::from_value(job.payload.clone())?;
                self.delivery().purge(&payload).await?;
            }
        }
        Ok(())
    }
}
