//! Approval Workflow Module
//!
//! Drives a purchase from the buyer's request to delivery, decline or expiry.
//!
//! # States
//! - AwaitingBuyerConfirmation: amount allocated, `ExpireConfirmation` armed
//! - AwaitingSellerApproval: buyer says they paid, `ExpireApproval` armed
//!
//! Every terminal transition (approved, declined, expired) deletes the
//! PendingPayment with a write guarded by the status it was read in. Whoever
//! wins that delete performs the side effects, so a late timer, a double
//! click or automation racing the seller all resolve the purchase once.

use super::notices::{self, Control};
use crate::batch::LinkBuilder;
use crate::channel::{MessageChannel, OutgoingMessage};
use crate::config::Config;
use crate::delivery::{DeliveryReport, DeliveryService};
use crate::error::{Error, Result};
use crate::pool::{AmountPool, PaymentRequest};
use crate::registry::Registry;
use crate::scheduler::JobScheduler;
use crate::types::{
    BatchId, FileBatch, JobId, JobKind, MessageRef, PaymentId, PaymentJob, PaymentStatus,
    PendingPayment, Pricing, Provenance, UserId,
};
use crate::validation::{MembershipGate, MembershipWatch};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of a buyer opening a batch link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Free batch sent straight away
    Delivered(DeliveryReport),
    /// Paid batch: payment instructions sent
    AwaitingPayment(PendingPayment),
    /// Buyer was asked to join the required channel first
    MembershipRequired,
}

/// A payment that was approved and delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub payment: PendingPayment,
    pub provenance: Provenance,
    pub delivery: DeliveryReport,
}

/// Timing knobs taken from the configuration
#[derive(Debug, Clone)]
struct Windows {
    confirmation: chrono::Duration,
    approval: chrono::Duration,
    free_retention: Duration,
    paid_retention: Duration,
}

pub struct ApprovalWorkflow {
    registry: Arc<Registry>,
    channel: Arc<dyn MessageChannel>,
    pool: AmountPool,
    scheduler: JobScheduler,
    delivery: DeliveryService,
    links: LinkBuilder,
    gate: MembershipGate,
    windows: Windows,
    payment_page_url: String,
}

impl ApprovalWorkflow {
    /// Creates the workflow and the components it drives
    ///
    /// # Arguments
    /// * `registry` - Shared record store
    /// * `channel` - Messaging channel used for every notification and delivery
    /// * `config` - Windows, retention periods, offset cap, links and membership
    pub fn new(registry: Arc<Registry>, channel: Arc<dyn MessageChannel>, config: &Config) -> Self {
        let scheduler = JobScheduler::new(registry.clone());
        Self {
            pool: AmountPool::new(registry.clone(), config.payment.amount_offset_cap),
            delivery: DeliveryService::new(channel.clone(), scheduler.clone()),
            links: LinkBuilder::new(config.links.bot_username.clone()),
            gate: MembershipGate::new(channel.clone(), &config.membership),
            windows: Windows {
                confirmation: config.payment.confirmation_window(),
                approval: config.payment.approval_window(),
                free_retention: config.delivery.free_retention(),
                paid_retention: config.delivery.paid_retention(),
            },
            payment_page_url: config.payment.payment_page_url.clone(),
            scheduler,
            registry,
            channel,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    pub(crate) fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    /// Buyer opened the link of `batch_id`
    ///
    /// # Returns
    /// * `Ok(Delivered)` for a free batch
    /// * `Ok(AwaitingPayment)` for a paid batch, with the allocated amount
    /// * `Ok(MembershipRequired)` when the buyer must join a channel first
    /// * `Err(NotFound)` for an unknown batch, `Err(ResourceExhausted)` when
    ///   no payable amount is free (the buyer is told in both cases)
    pub async fn request_access(&self, buyer: UserId, batch_id: &BatchId) -> Result<AccessOutcome> {
        let Some(batch) = self.registry.get_batch(batch_id).await? else {
            self.notify(buyer, notices::invalid_link()).await;
            return Err(Error::not_found("batch", batch_id));
        };

        if !self.gate.is_member(buyer).await {
            if let Some(channel) = self.gate.required_channel() {
                self.notify(buyer, notices::join_prompt(channel, batch_id)).await;
            }
            debug!("{} must join before opening batch {}", buyer, batch_id);
            return Ok(AccessOutcome::MembershipRequired);
        }

        let (price, payee) = match &batch.pricing {
            Pricing::Free => {
                let report = self
                    .delivery
                    .deliver(&batch, buyer, self.windows.free_retention)
                    .await;
                return Ok(AccessOutcome::Delivered(report));
            }
            Pricing::Paid { price, payee } => (*price, payee),
        };

        // Step 1: Arm the confirmation timer first so the payment never exists without one
        let payment_id = PaymentId::generate();
        let confirm_job = self
            .scheduler
            .schedule(
                JobKind::ExpireConfirmation,
                Utc::now() + self.windows.confirmation,
                &PaymentJob {
                    payment_id: payment_id.clone(),
                },
            )
            .await?;

        // Step 2: Claim a unique amount, which also stores the payment
        let request = PaymentRequest {
            id: payment_id,
            batch_id: batch.id.clone(),
            buyer,
            confirm_job: Some(confirm_job.clone()),
            created_at: Utc::now(),
        };
        let payment = match self.pool.allocate(price, request).await {
            Ok(payment) => payment,
            Err(e) => {
                self.scheduler.cancel(&confirm_job).await;
                if matches!(e, Error::ResourceExhausted { .. }) {
                    self.notify(buyer, notices::busy()).await;
                }
                return Err(e);
            }
        };

        // Step 3: Tell the buyer what to pay
        let pay_url = self
            .links
            .payment_page_link(&self.payment_page_url, payment.unique_amount, payee);
        self.notify(
            buyer,
            notices::payment_instructions(
                &payment,
                self.windows.confirmation.num_minutes(),
                pay_url,
            ),
        )
        .await;

        info!(
            payment_id = %payment.id,
            batch_id = %batch.id,
            amount = %payment.unique_amount,
            "{} is awaiting buyer confirmation",
            buyer
        );
        Ok(AccessOutcome::AwaitingPayment(payment))
    }

    /// Keeps re-checking a buyer who was shown the join prompt and continues
    /// their request once they have joined
    pub fn watch_membership(self: &Arc<Self>, buyer: UserId, batch_id: BatchId) -> MembershipWatch {
        let workflow = Arc::clone(self);
        self.gate.watch(buyer, move || async move {
            if let Err(e) = workflow.request_access(buyer, &batch_id).await {
                warn!("Access for {} to {} after joining failed: {}", buyer, batch_id, e);
            }
        })
    }

    /// Routes a pressed control to the matching transition
    pub async fn handle_control(&self, user: UserId, data: &str) -> Result<()> {
        let control =
            Control::parse(data).ok_or_else(|| Error::invalid(format!("unknown control {data}")))?;
        match control {
            Control::Paid(id) => self.confirm_payment(user, &id).await.map(|_| ()),
            Control::Approve(id) => self.approve(user, &id).await.map(|_| ()),
            Control::Decline(id) => self.decline(user, &id).await.map(|_| ()),
            Control::CheckJoin(batch_id) => {
                if self.gate.is_member(user).await {
                    self.request_access(user, &batch_id).await.map(|_| ())
                } else {
                    if let Some(channel) = self.gate.required_channel() {
                        self.notify(user, notices::still_not_member(channel)).await;
                    }
                    Ok(())
                }
            }
        }
    }

    /// Buyer pressed "I have paid"
    ///
    /// # Returns
    /// The payment, now awaiting seller approval with its approval timer armed
    pub async fn confirm_payment(
        &self,
        buyer: UserId,
        payment_id: &PaymentId,
    ) -> Result<PendingPayment> {
        let Some(mut payment) = self.registry.get_payment(payment_id).await? else {
            self.notify(buyer, notices::payment_gone()).await;
            return Err(Error::not_found("payment", payment_id));
        };
        if payment.buyer != buyer {
            return Err(Error::unauthorized(format!(
                "{buyer} did not open payment {payment_id}"
            )));
        }
        if payment.status != PaymentStatus::AwaitingBuyerConfirmation {
            return Err(Error::conflict(format!(
                "payment {payment_id} was already confirmed"
            )));
        }

        // Step 1: Arm the approval timer, then move the payment onto it
        let approval_job = self
            .scheduler
            .schedule(
                JobKind::ExpireApproval,
                Utc::now() + self.windows.approval,
                &PaymentJob {
                    payment_id: payment_id.clone(),
                },
            )
            .await?;
        let moved = self
            .registry
            .transition_payment(
                payment_id,
                PaymentStatus::AwaitingBuyerConfirmation,
                PaymentStatus::AwaitingSellerApproval,
                Some(&approval_job),
            )
            .await?;
        if !moved {
            self.scheduler.cancel(&approval_job).await;
            return Err(Error::conflict(format!(
                "payment {payment_id} changed while confirming"
            )));
        }
        payment.status = PaymentStatus::AwaitingSellerApproval;
        payment.approval_job = Some(approval_job);

        // Step 2: The confirmation timer is now moot
        if let Some(job) = &payment.confirm_job {
            self.scheduler.cancel(job).await;
        }

        // Step 3: Hand over to the seller
        let Some(batch) = self.registry.get_batch(&payment.batch_id).await? else {
            return Err(self.orphaned(&payment).await);
        };
        self.notify(batch.owner, notices::seller_prompt(&payment, &batch))
            .await;
        self.notify(buyer, notices::awaiting_seller(&payment)).await;

        info!(
            payment_id = %payment.id,
            "Payment confirmed by {}, awaiting approval from {}",
            buyer,
            batch.owner
        );
        Ok(payment)
    }

    /// Seller pressed "Approve"
    pub async fn approve(&self, seller: UserId, payment_id: &PaymentId) -> Result<Resolution> {
        let (payment, batch) = self.load_for_seller(seller, payment_id).await?;
        self.resolve_approved(payment, batch, Provenance::Manual)
            .await
    }

    /// Approval on behalf of an allow-listed seller
    ///
    /// Accepts either pending state: the bank notice can arrive before the
    /// buyer presses "I have paid".
    pub(crate) async fn approve_automated(
        &self,
        payment: PendingPayment,
        batch: FileBatch,
    ) -> Result<Resolution> {
        self.resolve_approved(payment, batch, Provenance::Automated)
            .await
    }

    /// Seller pressed "Decline"
    pub async fn decline(&self, seller: UserId, payment_id: &PaymentId) -> Result<PendingPayment> {
        let (payment, _) = self.load_for_seller(seller, payment_id).await?;
        if !self.claim(&payment).await? {
            return Err(Error::conflict(format!(
                "payment {payment_id} was already resolved"
            )));
        }

        self.notify(payment.buyer, notices::declined_buyer(&payment))
            .await;
        self.notify(seller, notices::declined_seller(&payment)).await;
        info!(payment_id = %payment.id, "Payment declined by {}", seller);
        Ok(payment)
    }

    /// `ExpireConfirmation` fired
    ///
    /// # Returns
    /// `false` if the payment was already gone or confirmed (no-op)
    pub async fn expire_confirmation(&self, payment_id: &PaymentId) -> Result<bool> {
        let Some(payment) = self
            .current(payment_id, PaymentStatus::AwaitingBuyerConfirmation)
            .await?
        else {
            return Ok(false);
        };
        if !self.claim(&payment).await? {
            debug!(payment_id = %payment_id, "Confirmation expiry lost the race");
            return Ok(false);
        }

        let link = self.links.share_link(&payment.batch_id);
        self.notify(payment.buyer, notices::confirmation_expired(link))
            .await;
        info!(payment_id = %payment_id, "Payment expired awaiting buyer confirmation");
        Ok(true)
    }

    /// `ExpireApproval` fired
    ///
    /// # Returns
    /// `false` if the payment was already resolved (no-op)
    pub async fn expire_approval(&self, payment_id: &PaymentId) -> Result<bool> {
        let Some(payment) = self
            .current(payment_id, PaymentStatus::AwaitingSellerApproval)
            .await?
        else {
            return Ok(false);
        };
        if !self.claim(&payment).await? {
            debug!(payment_id = %payment_id, "Approval expiry lost the race");
            return Ok(false);
        }

        self.notify(payment.buyer, notices::approval_expired_buyer(&payment))
            .await;
        match self.registry.get_batch(&payment.batch_id).await? {
            Some(batch) => {
                self.notify(batch.owner, notices::approval_expired_seller(&payment))
                    .await;
            }
            None => warn!(
                payment_id = %payment_id,
                "Seller of expired payment unknown, batch {} is gone",
                payment.batch_id
            ),
        }
        info!(payment_id = %payment_id, "Payment expired awaiting seller approval");
        Ok(true)
    }

    async fn resolve_approved(
        &self,
        payment: PendingPayment,
        batch: FileBatch,
        provenance: Provenance,
    ) -> Result<Resolution> {
        // Step 1: Claim the payment; only the winner delivers
        if !self.claim(&payment).await? {
            return Err(Error::conflict(format!(
                "payment {} was already resolved",
                payment.id
            )));
        }

        // Step 2: Deliver
        let report = self
            .delivery
            .deliver(&batch, payment.buyer, self.windows.paid_retention)
            .await;
        if !report.success {
            warn!(
                payment_id = %payment.id,
                "Approved payment delivered {}/{} files",
                report.delivered_count,
                report.total
            );
        }

        // Step 3: Tell both sides
        if provenance == Provenance::Automated {
            self.notify(payment.buyer, notices::automated_notice(&payment))
                .await;
        }
        self.notify(
            batch.owner,
            notices::seller_summary(&payment, provenance, &report),
        )
        .await;

        info!(
            payment_id = %payment.id,
            amount = %payment.unique_amount,
            "Payment approved ({})",
            provenance
        );
        Ok(Resolution {
            payment,
            provenance,
            delivery: report,
        })
    }

    /// Payment plus batch for a seller action, checked for ownership and state
    async fn load_for_seller(
        &self,
        seller: UserId,
        payment_id: &PaymentId,
    ) -> Result<(PendingPayment, FileBatch)> {
        let payment = self
            .registry
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| Error::not_found("payment", payment_id))?;
        let Some(batch) = self.registry.get_batch(&payment.batch_id).await? else {
            return Err(self.orphaned(&payment).await);
        };
        if batch.owner != seller {
            return Err(Error::unauthorized(format!(
                "{seller} does not own batch {}",
                batch.id
            )));
        }
        if payment.status != PaymentStatus::AwaitingSellerApproval {
            return Err(Error::conflict(format!(
                "payment {payment_id} is not awaiting approval"
            )));
        }
        Ok((payment, batch))
    }

    /// The payment if it still exists in `status`
    async fn current(
        &self,
        payment_id: &PaymentId,
        status: PaymentStatus,
    ) -> Result<Option<PendingPayment>> {
        match self.registry.get_payment(payment_id).await? {
            Some(payment) if payment.status == status => Ok(Some(payment)),
            Some(payment) => {
                debug!(
                    payment_id = %payment_id,
                    "Timer for {} found payment in {}, ignoring",
                    status.as_str(),
                    payment.status.as_str()
                );
                Ok(None)
            }
            None => {
                debug!(payment_id = %payment_id, "Timer found no payment, ignoring");
                Ok(None)
            }
        }
    }

    /// Deletes the payment if it is still in the state it was read in and
    /// drops its timers
    ///
    /// # Returns
    /// `true` for the caller that won the delete
    async fn claim(&self, payment: &PendingPayment) -> Result<bool> {
        let won = self
            .registry
            .delete_payment_if(&payment.id, Some(payment.status))
            .await?;
        if won {
            self.cancel_timers(payment).await;
        }
        Ok(won)
    }

    async fn cancel_timers(&self, payment: &PendingPayment) {
        let jobs: [&Option<JobId>; 2] = [&payment.confirm_job, &payment.approval_job];
        for job in jobs.into_iter().flatten() {
            self.scheduler.cancel(job).await;
        }
    }

    /// A payment whose batch is gone: remove it and report the fault
    pub(crate) async fn orphaned(&self, payment: &PendingPayment) -> Error {
        error!(
            payment_id = %payment.id,
            "Integrity fault: batch {} of pending payment is gone",
            payment.batch_id
        );
        match self.registry.delete_payment_if(&payment.id, None).await {
            Ok(_) => self.cancel_timers(payment).await,
            Err(e) => error!(payment_id = %payment.id, "Orphaned payment not removed: {}", e),
        }
        self.notify(payment.buyer, notices::batch_gone()).await;
        Error::integrity(format!(
            "payment {} references missing batch {}",
            payment.id, payment.batch_id
        ))
    }

    /// Best-effort notification; failures are logged, never propagated
    async fn notify(&self, user: UserId, message: OutgoingMessage) -> Option<MessageRef> {
        match self.channel.send_message(user.0, message).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!("Notification to {} failed: {}", user, e);
                None
            }
        }
    }
}
