//! Amount Pool Module
//!
//! Hands out payable amounts that are unique across every open payment, so an
//! incoming payment notice can be matched to exactly one purchase by amount.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{
    BatchId, JobId, PaymentId, PaymentStatus, PendingPayment, UserId, normalize_amount,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything about a new payment except its amount
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub id: PaymentId,
    pub batch_id: BatchId,
    pub buyer: UserId,
    pub confirm_job: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

/// Allocator for unique payable amounts
///
/// Candidates are `base + 0.01`, `base + 0.02`, ... up to `base + cap/100`.
/// Each candidate is claimed by inserting the pending payment itself, which
/// the store rejects if another open payment already holds that amount. The
/// claim and the record creation are the same write, so there is nothing to
/// roll back when a later step fails: deleting the payment frees the amount.
pub struct AmountPool {
    registry: Arc<Registry>,
    cap: u32,
}

impl AmountPool {
    /// Creates a pool trying at most `cap` offsets above each base price
    pub fn new(registry: Arc<Registry>, cap: u32) -> Self {
        Self { registry, cap }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Claims the smallest free amount above `base_price` for a new payment
    ///
    /// # Arguments
    /// * `base_price` - Listed price of the batch
    /// * `request` - Identity of the payment being opened
    ///
    /// # Returns
    /// The stored payment in `AwaitingBuyerConfirmation`, or
    /// `ResourceExhausted` if every candidate is taken
    pub async fn allocate(
        &self,
        base_price: Decimal,
        request: PaymentRequest,
    ) -> Result<PendingPayment> {
        let base = normalize_amount(base_price);
        let mut payment = PendingPayment {
            id: request.id,
            batch_id: request.batch_id,
            buyer: request.buyer,
            unique_amount: base,
            status: PaymentStatus::AwaitingBuyerConfirmation,
            confirm_job: request.confirm_job,
            approval_job: None,
            created_at: request.created_at,
        };

        for offset in 1..=self.cap {
            payment.unique_amount = base + Decimal::new(i64::from(offset), 2);
            if self.registry.try_claim_payment(&payment).await? {
                debug!(
                    payment_id = %payment.id,
                    amount = %payment.unique_amount,
                    "payable amount allocated"
                );
                return Ok(payment);
            }
        }

        warn!(base = %base, cap = self.cap, "no free payable amount");
        Err(Error::ResourceExhausted {
            base,
            cap: self.cap,
        })
    }

    /// Frees the amount held by `payment_id`, whatever state it is in
    ///
    /// # Returns
    /// `false` if the payment was already gone
    pub async fn release(&self, payment_id: &PaymentId) -> Result<bool> {
        self.registry.delete_payment_if(payment_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    fn request(buyer: i64) -> PaymentRequest {
        PaymentRequest {
            id: PaymentId::generate(),
            batch_id: BatchId::new("batch000001"),
            buyer: UserId(buyer),
            confirm_job: None,
            created_at: Utc::now(),
        }
    }

    fn price(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    async fn pool(cap: u32) -> Arc<AmountPool> {
        let registry = Arc::new(Registry::in_memory().await.unwrap());
        Arc::new(AmountPool::new(registry, cap))
    }

    #[tokio::test]
    async fn test_concurrent_allocations_get_distinct_amounts() {
        let pool = pool(99).await;
        let mut handles = Vec::new();
        for buyer in 0..3 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.allocate(price("10.00"), request(buyer)).await
            }));
        }

        let mut amounts = HashSet::new();
        for handle in handles {
            let payment = handle.await.unwrap().unwrap();
            amounts.insert(payment.unique_amount.to_string());
        }
        let expected: HashSet<String> = ["10.01", "10.02", "10.03"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(amounts, expected);
    }

    #[tokio::test]
    async fn test_released_amount_is_reused() {
        let pool = pool(99).await;
        let first = pool.allocate(price("10"), request(1)).await.unwrap();
        pool.allocate(price("10"), request(2)).await.unwrap();
        assert_eq!(first.unique_amount.to_string(), "10.01");

        assert!(pool.release(&first.id).await.unwrap());
        let third = pool.allocate(price("10"), request(3)).await.unwrap();
        assert_eq!(third.unique_amount.to_string(), "10.01");
    }

    #[tokio::test]
    async fn test_exhausted_range_is_reported() {
        let pool = pool(2).await;
        pool.allocate(price("5.00"), request(1)).await.unwrap();
        pool.allocate(price("5.00"), request(2)).await.unwrap();

        let err = pool.allocate(price("5.00"), request(3)).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { cap: 2, .. }));
    }

    #[tokio::test]
    async fn test_uniqueness_spans_base_prices() {
        let pool = pool(99).await;
        // 10.00 + 0.02 collides with 10.01 + 0.01
        pool.allocate(price("10.00"), request(1)).await.unwrap();
        let second = pool.allocate(price("10.00"), request(2)).await.unwrap();
        assert_eq!(second.unique_amount.to_string(), "10.02");

        let other = pool.allocate(price("10.01"), request(3)).await.unwrap();
        assert_eq!(other.unique_amount.to_string(), "10.03");
    }
}
