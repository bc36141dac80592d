//! Batch Engine Module
//!
//! This module turns a creator's draft into a published batch.
//! Each batch gets a fresh opaque id; the draft is consumed in the same
//! transaction that stores the batch.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{BatchId, DraftSession, FileBatch, Payee, Pricing, UserId};
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

/// UPI virtual payment address: `handle@provider`
static UPI_ADDRESS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.\-_]{2,256}@[a-zA-Z]{2,64}$")
        .map_err(|e| error!("UPI address pattern failed to compile: {}", e))
        .ok()
});

/// Whether `reference` is a well-formed UPI address
pub fn is_upi_address(reference: &str) -> bool {
    UPI_ADDRESS
        .as_ref()
        .is_some_and(|re| re.is_match(reference))
}

/// Batch publishing engine
///
/// Validates the pricing, snapshots the draft's file list into a `FileBatch`
/// and atomically replaces the draft with it.
pub struct BatchEngine {
    registry: Arc<Registry>,
}

impl BatchEngine {
    /// Creates a new batch engine
    ///
    /// # Arguments
    /// * `registry` - Store holding drafts and batches
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Publish the creator's draft as a free batch
    pub async fn publish_free(&self, creator: UserId, now: DateTime<Utc>) -> Result<FileBatch> {
        self.publish(creator, Pricing::Free, now).await
    }

    /// Publish the creator's draft as a paid batch
    ///
    /// # Arguments
    /// * `creator` - Owner of the draft and of the resulting batch
    /// * `price` - Listed price, positive with at most two decimal places
    /// * `payee` - Payment address buyers are sent to, a UPI address
    /// * `now` - Publication time
    ///
    /// # Returns
    /// The stored batch, or `Invalid` for a bad price or payee
    pub async fn publish_paid(
        &self,
        creator: UserId,
        price: Decimal,
        payee: Payee,
        now: DateTime<Utc>,
    ) -> Result<FileBatch> {
        if price <= Decimal::ZERO {
            return Err(Error::invalid(format!("price must be positive, got {price}")));
        }
        if price.normalize().scale() > 2 {
            return Err(Error::invalid(format!(
                "price must not have more than two decimal places, got {price}"
            )));
        }
        let reference = payee.reference.trim();
        if !is_upi_address(reference) {
            return Err(Error::invalid(format!(
                "payee must be a UPI address like name@bank, got {reference:?}"
            )));
        }
        let payee = Payee {
            reference: reference.to_string(),
            ..payee
        };
        self.publish(creator, Pricing::Paid { price, payee }, now)
            .await
    }

    async fn publish(
        &self,
        creator: UserId,
        pricing: Pricing,
        now: DateTime<Utc>,
    ) -> Result<FileBatch> {
        // Step 1: Load the live draft
        let draft = self.live_draft(creator, now).await?;
        if draft.files.is_empty() {
            return Err(Error::invalid("cannot publish a batch without files"));
        }

        // Step 2: Snapshot it into a batch
        let batch = FileBatch {
            id: BatchId::generate(),
            owner: creator,
            files: draft.files.clone(),
            pricing,
            created_at: now,
        };

        // Step 3: Swap draft for batch, unless the draft moved on meanwhile
        if !self.registry.publish_draft(&draft, &batch).await? {
            return Err(Error::conflict(format!(
                "draft of {creator} changed while publishing"
            )));
        }

        info!(
            "Batch {} published by {} with {} files (paid={})",
            batch.id,
            creator,
            batch.files.len(),
            batch.is_paid()
        );
        Ok(batch)
    }

    async fn live_draft(&self, creator: UserId, now: DateTime<Utc>) -> Result<DraftSession> {
        match self.registry.get_draft(creator).await? {
            Some(draft) if draft.expires_at > now => Ok(draft),
            _ => Err(Error::not_found("draft", creator)),
        }
    }
}
