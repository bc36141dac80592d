//! Tests for the registry's conditional writes

#[cfg(test)]
mod tests {
    use crate::registry::Registry;
    use crate::types::{
        BatchId, DraftSession, EditSession, FileBatch, FileRef, JobId, JobKind, Payee,
        PaymentId, PaymentStatus, PendingPayment, Pricing, ScheduledJob, UserId,
    };
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn amount(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn paid_batch(owner: i64) -> FileBatch {
        FileBatch {
            id: BatchId::generate(),
            owner: UserId(owner),
            files: vec![FileRef::new("f1"), FileRef::new("f2")],
            pricing: Pricing::Paid {
                price: amount("49.00"),
                payee: Payee {
                    reference: "seller@upi".into(),
                    name: "Seller".into(),
                },
            },
            created_at: Utc::now(),
        }
    }

    fn payment(batch: &BatchId, unique_amount: &str) -> PendingPayment {
        PendingPayment {
            id: PaymentId::generate(),
            batch_id: batch.clone(),
            buyer: UserId(7),
            unique_amount: amount(unique_amount),
            status: PaymentStatus::AwaitingBuyerConfirmation,
            confirm_job: Some(JobId::generate()),
            approval_job: None,
            created_at: Utc::now(),
        }
    }

    fn draft(creator: i64, files: &[&str]) -> DraftSession {
        let now = Utc::now();
        DraftSession {
            creator: UserId(creator),
            files: files.iter().map(|f| FileRef::new(*f)).collect(),
            menu: None,
            last_activity: now,
            expires_at: now + Duration::minutes(60),
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_batch_round_trip_keeps_pricing() {
        let registry = Registry::in_memory().await.unwrap();
        let batch = paid_batch(1);
        registry.insert_batch(&batch).await.unwrap();

        let loaded = registry.get_batch(&batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.files, batch.files);
        assert_eq!(loaded.pricing, batch.pricing);
        assert!(loaded.is_paid());

        assert!(registry.delete_batch(&batch.id).await.unwrap());
        assert!(registry.get_batch(&batch.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_amount_claim_is_exclusive() {
        let registry = Registry::in_memory().await.unwrap();
        let batch = BatchId::generate();

        assert!(registry.try_claim_payment(&payment(&batch, "10.01")).await.unwrap());
        // Same amount written with a different scale still collides
        assert!(!registry.try_claim_payment(&payment(&batch, "10.010")).await.unwrap());
        assert!(registry.try_claim_payment(&payment(&batch, "10.02")).await.unwrap());

        let found = registry.find_payment_by_amount(amount("10.01")).await.unwrap();
        assert_eq!(found.unwrap().unique_amount.to_string(), "10.01");
    }

    #[tokio::test]
    async fn test_transition_requires_current_status() {
        let registry = Registry::in_memory().await.unwrap();
        let record = payment(&BatchId::generate(), "5.01");
        registry.try_claim_payment(&record).await.unwrap();
        let approval_job = JobId::generate();

        let moved = registry
            .transition_payment(
                &record.id,
                PaymentStatus::AwaitingBuyerConfirmation,
                PaymentStatus::AwaitingSellerApproval,
                Some(&approval_job),
            )
            .await
            .unwrap();
        assert!(moved);

        let again = registry
            .transition_payment(
                &record.id,
                PaymentStatus::AwaitingBuyerConfirmation,
                PaymentStatus::AwaitingSellerApproval,
                None,
            )
            .await
            .unwrap();
        assert!(!again);

        let stored = registry.get_payment(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::AwaitingSellerApproval);
        assert_eq!(stored.approval_job, Some(approval_job));
        assert_eq!(stored.confirm_job, record.confirm_job);

        // Status-guarded delete only matches the current state
        assert!(!registry
            .delete_payment_if(&record.id, Some(PaymentStatus::AwaitingBuyerConfirmation))
            .await
            .unwrap());
        assert!(registry
            .delete_payment_if(&record.id, Some(PaymentStatus::AwaitingSellerApproval))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_deleted_payment_releases_amount() {
        let registry = Registry::in_memory().await.unwrap();
        let batch = BatchId::generate();
        let first = payment(&batch, "20.01");
        registry.try_claim_payment(&first).await.unwrap();
        registry.delete_payment_if(&first.id, None).await.unwrap();

        assert!(registry.try_claim_payment(&payment(&batch, "20.01")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_claims_each_due_job_once() {
        let registry = Registry::in_memory().await.unwrap();
        let now = Utc::now();
        let due = ScheduledJob {
            id: JobId::generate(),
            kind: JobKind::ExpireConfirmation,
            fire_at: now - Duration::seconds(1),
            payload: serde_json::json!({ "payment_id": "abc" }),
            lease_until: None,
            created_at: now,
        };
        let later = ScheduledJob {
            id: JobId::generate(),
            fire_at: now + Duration::minutes(5),
            ..due.clone()
        };
        registry.insert_job(&due).await.unwrap();
        registry.insert_job(&later).await.unwrap();

        let lease = now + Duration::seconds(60);
        let leased = registry.lease_due_jobs(now, lease, 10).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, due.id);
        assert_eq!(leased[0].payload, due.payload);

        assert!(registry.lease_due_jobs(now, lease, 10).await.unwrap().is_empty());

        // An expired lease makes the job claimable again
        let after_lease = lease + Duration::seconds(1);
        let retried = registry
            .lease_due_jobs(after_lease, after_lease + Duration::seconds(60), 10)
            .await
            .unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].id, due.id);
    }

    #[tokio::test]
    async fn test_draft_updates_are_version_guarded() {
        let registry = Registry::in_memory().await.unwrap();
        let first = draft(3, &["a"]);
        assert!(registry.insert_draft_if_absent(&first).await.unwrap());
        assert!(!registry.insert_draft_if_absent(&draft(3, &["b"])).await.unwrap());

        let mut next = first.clone();
        next.files.push(FileRef::new("b"));
        next.version = 2;
        assert!(registry.update_draft_if_version(&next, 1).await.unwrap());
        // A writer still holding version 1 loses
        assert!(!registry.update_draft_if_version(&next, 1).await.unwrap());

        let stored = registry.get_draft(UserId(3)).await.unwrap().unwrap();
        assert_eq!(stored.files.len(), 2);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_publish_draft_is_atomic() {
        let registry = Registry::in_memory().await.unwrap();
        let stored = draft(4, &["a", "b"]);
        registry.insert_draft_if_absent(&stored).await.unwrap();

        let mut batch = paid_batch(4);
        batch.files = stored.files.clone();

        let mut stale = stored.clone();
        stale.version = 9;
        assert!(!registry.publish_draft(&stale, &batch).await.unwrap());
        assert!(registry.get_batch(&batch.id).await.unwrap().is_none());
        assert!(registry.get_draft(UserId(4)).await.unwrap().is_some());

        assert!(registry.publish_draft(&stored, &batch).await.unwrap());
        assert!(registry.get_batch(&batch.id).await.unwrap().is_some());
        assert!(registry.get_draft(UserId(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_edit_rejects_foreign_batch() {
        let registry = Registry::in_memory().await.unwrap();
        let batch = paid_batch(1);
        registry.insert_batch(&batch).await.unwrap();
        let now = Utc::now();

        // Session owned by someone who does not own the batch
        let session = EditSession {
            batch_id: batch.id.clone(),
            owner: UserId(2),
            files: vec![FileRef::new("x")],
            prompt: None,
            accepting_files: false,
            last_activity: now,
            expires_at: now + Duration::minutes(30),
            version: 1,
        };
        registry.upsert_edit(&session).await.unwrap();

        assert!(!registry.save_edit(&session).await.unwrap());
        let unchanged = registry.get_batch(&batch.id).await.unwrap().unwrap();
        assert_eq!(unchanged.files, batch.files);
        assert!(registry.get_edit(&batch.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_sessions() {
        let registry = Registry::in_memory().await.unwrap();
        let now = Utc::now();
        let mut expired = draft(5, &["a"]);
        expired.expires_at = now - Duration::seconds(1);
        registry.insert_draft_if_absent(&expired).await.unwrap();
        registry.insert_draft_if_absent(&draft(6, &["b"])).await.unwrap();

        assert_eq!(registry.purge_expired_sessions(now).await.unwrap(), 1);
        assert!(registry.get_draft(UserId(5)).await.unwrap().is_none());
        assert!(registry.get_draft(UserId(6)).await.unwrap().is_some());
    }
}
