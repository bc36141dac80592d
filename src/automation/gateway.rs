//! Automation Gateway Module
//!
//! Resolves payments from amounts parsed out of bank notifications. The text
//! those amounts come from is untrusted, so the seller allow-list is checked
//! before anything is written.

use crate::approval::{ApprovalWorkflow, Resolution};
use crate::error::Result;
use crate::types::{PaymentId, UserId, normalize_amount};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// What an automated resolution attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationOutcome {
    /// No pending payment holds this amount
    NoMatch { amount: Decimal },
    /// The seller is not allow-listed; the payment is left for them to approve
    ManualApprovalRequired { payment_id: PaymentId },
    Resolved(Resolution),
}

pub struct AutomationGateway {
    workflow: Arc<ApprovalWorkflow>,
    trusted: HashSet<UserId>,
}

impl AutomationGateway {
    /// Creates a gateway that may approve on behalf of `trusted` sellers only
    pub fn new(workflow: Arc<ApprovalWorkflow>, trusted: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            workflow,
            trusted: trusted.into_iter().collect(),
        }
    }

    pub fn is_trusted(&self, owner: UserId) -> bool {
        self.trusted.contains(&owner)
    }

    /// Approves the pending payment holding `amount`, if its seller allows it
    ///
    /// # Arguments
    /// * `amount` - Amount parsed from the notification
    ///
    /// # Returns
    /// * `Ok(NoMatch)` / `Ok(ManualApprovalRequired)` - nothing was changed
    /// * `Ok(Resolved)` - the payment was approved and delivered
    /// * `Err(Integrity)` - the payment's batch is gone; the payment is removed
    pub async fn resolve_by_amount(&self, amount: Decimal) -> Result<AutomationOutcome> {
        let amount = normalize_amount(amount);
        let registry = self.workflow.registry();

        let Some(payment) = registry.find_payment_by_amount(amount).await? else {
            info!(amount = %amount, "Automation: no pending payment matches");
            return Ok(AutomationOutcome::NoMatch { amount });
        };
        let Some(batch) = registry.get_batch(&payment.batch_id).await? else {
            // No owner left to consult, so the orphan is removed like on the manual paths
            return Err(self.workflow.orphaned(&payment).await);
        };

        if !self.is_trusted(batch.owner) {
            info!(
                payment_id = %payment.id,
                "Automation: seller {} is not allow-listed, manual approval required",
                batch.owner
            );
            return Ok(AutomationOutcome::ManualApprovalRequired {
                payment_id: payment.id,
            });
        }

        let resolution = self.workflow.approve_automated(payment, batch).await?;
        Ok(AutomationOutcome::Resolved(resolution))
    }
}
