//! Delivery Service Module
//!
//! Copies a batch's files into the recipient's chat and arms their cleanup.
//!
//! # Delivery Flow
//! 1. Send the "access granted" header
//! 2. Copy each file in list order, attaching the retention warning as a
//!    caption or, for items that cannot carry one, as a reply
//! 3. Arm one `DeleteDelivered` job covering every message sent above
//!
//! An unreachable recipient aborts the remaining files. Any other per-file
//! failure marks the delivery unsuccessful and moves on to the next file. A
//! header that fails to send for another reason is only logged.

use crate::channel::{ChannelError, MessageChannel, OutgoingMessage};
use crate::error::{Error, Result};
use crate::scheduler::JobScheduler;
use crate::types::{CleanupJob, FileBatch, JobId, JobKind, MessageRef, UserId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Files that reached the recipient
    pub delivered_count: usize,
    /// Files in the batch
    pub total: usize,
    /// Every file arrived and nothing went wrong on the way
    pub success: bool,
    /// Job that will delete the delivered messages
    pub cleanup_job: Option<JobId>,
}

/// Whether to keep going after a failed step
enum Step {
    Continue,
    Abort,
}

pub struct DeliveryService {
    channel: Arc<dyn MessageChannel>,
    scheduler: JobScheduler,
}

impl DeliveryService {
    pub fn new(channel: Arc<dyn MessageChannel>, scheduler: JobScheduler) -> Self {
        Self { channel, scheduler }
    }

    /// Sends `batch` to `recipient`; everything sent is deleted after `retention`
    ///
    /// Never fails: problems are reflected in the report so the caller can
    /// still settle the purchase and tell the seller.
    pub async fn deliver(
        &self,
        batch: &FileBatch,
        recipient: UserId,
        retention: Duration,
    ) -> DeliveryReport {
        let chat = recipient.0;
        let total = batch.files.len();
        let label = retention_label(retention);
        let mut sent_ids = Vec::with_capacity(total * 2 + 1);
        let mut delivered_count = 0;
        let mut clean = true;

        // Step 1: Header
        let header = OutgoingMessage::text(format!(
            "✅ Access granted! You are receiving {total} file(s)."
        ));
        // Only file outcomes count towards success
        match self.channel.send_message(chat, header).await {
            Ok(message) => sent_ids.push(message.message_id),
            Err(e) => {
                if let Step::Abort = self.on_failure(&batch.id.to_string(), chat, &e) {
                    return self.finish(chat, sent_ids, delivered_count, total, false, retention).await;
                }
            }
        }

        // Step 2: Files, in order
        let warning = format!("⚠️ This file will be deleted in {label}. Save it elsewhere.");
        for (index, file) in batch.files.iter().enumerate() {
            let copied = match self.channel.copy_message(chat, file).await {
                Ok(copied) => copied,
                Err(e) => {
                    clean = false;
                    if let Step::Abort = self.on_failure(&batch.id.to_string(), chat, &e) {
                        break;
                    }
                    let notice = OutgoingMessage::text(format!(
                        "❌ Could not send file {} of {total}.",
                        index + 1
                    ));
                    match self.channel.send_message(chat, notice).await {
                        Ok(message) => sent_ids.push(message.message_id),
                        Err(e) => debug!("Failure notice not sent to {}: {}", chat, e),
                    }
                    continue;
                }
            };
            sent_ids.push(copied.message.message_id);
            delivered_count += 1;

            match self.attach_warning(copied.message, copied.captionable, copied.caption, &warning).await {
                Ok(Some(reply)) => sent_ids.push(reply.message_id),
                Ok(None) => {}
                Err(e) => {
                    if let Step::Abort = self.on_failure(&batch.id.to_string(), chat, &e) {
                        clean = false;
                        break;
                    }
                }
            }
        }

        let success = clean && delivered_count == total;
        self.finish(chat, sent_ids, delivered_count, total, success, retention)
            .await
    }

    /// Deletes the messages of a past delivery
    pub async fn purge(&self, job: &CleanupJob) -> Result<()> {
        if job.message_ids.is_empty() {
            return Ok(());
        }
        self.channel
            .delete_messages(job.chat, &job.message_ids)
            .await?;
        info!(
            "Deleted {} delivered messages in chat {}",
            job.message_ids.len(),
            job.chat
        );
        Ok(())
    }

    /// Captions the copied item, or replies to it when it cannot carry one
    ///
    /// # Returns
    /// The reply, if one had to be sent
    async fn attach_warning(
        &self,
        message: MessageRef,
        captionable: bool,
        caption: Option<String>,
        warning: &str,
    ) -> std::result::Result<Option<MessageRef>, ChannelError> {
        if captionable {
            let text = match caption {
                Some(caption) if !caption.is_empty() => format!("{caption}\n\n{warning}"),
                _ => warning.to_string(),
            };
            match self.channel.edit_message(message, text).await {
                Ok(()) => return Ok(None),
                Err(ChannelError::RecipientUnreachable(chat)) => {
                    return Err(ChannelError::RecipientUnreachable(chat));
                }
                Err(e) => debug!("Caption edit failed, replying instead: {}", e),
            }
        }
        let reply = OutgoingMessage::text(warning).replying_to(message.message_id);
        self.channel.send_message(message.chat, reply).await.map(Some)
    }

    fn on_failure(&self, batch: &str, chat: i64, error: &ChannelError) -> Step {
        match error {
            ChannelError::RecipientUnreachable(_) => {
                warn!("Delivery of batch {} to {} aborted: {}", batch, chat, error);
                Step::Abort
            }
            ChannelError::Transient(_) => {
                warn!("Delivery of batch {} to {} hit a failure: {}", batch, chat, error);
                Step::Continue
            }
        }
    }

    async fn finish(
        &self,
        chat: i64,
        sent_ids: Vec<i64>,
        delivered_count: usize,
        total: usize,
        success: bool,
        retention: Duration,
    ) -> DeliveryReport {
        let cleanup_job = if sent_ids.is_empty() {
            None
        } else {
            match self.schedule_cleanup(chat, sent_ids, retention).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Cleanup for chat {} not scheduled: {}", chat, e);
                    None
                }
            }
        };

        info!(
            "Delivered {}/{} files to {} (success={})",
            delivered_count, total, chat, success
        );
        DeliveryReport {
            delivered_count,
            total,
            success,
            cleanup_job,
        }
    }

    async fn schedule_cleanup(
        &self,
        chat: i64,
        message_ids: Vec<i64>,
        retention: Duration,
    ) -> Result<JobId> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| Error::invalid(format!("retention out of range: {e}")))?;
        self.scheduler
            .schedule(
                JobKind::DeleteDelivered,
                Utc::now() + retention,
                &CleanupJob { chat, message_ids },
            )
            .await
    }
}

/// Human form of a retention period, e.g. "24 hours" or "30 minutes"
pub fn retention_label(retention: Duration) -> String {
    let secs = retention.as_secs();
    let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}
