//! Tests for the purchase state machine
//!
//! Drives the workflow through every transition against an in-memory store
//! and channel, firing timers through the real dispatcher.

#[cfg(test)]
mod tests {
    use crate::approval::AccessOutcome;
    use crate::channel::ActionTarget;
    use crate::error::Error;
    use crate::testing::{BUYER, Harness, SELLER, test_config};
    use crate::types::{JobKind, PaymentStatus, PendingPayment, Provenance, UserId};
    use crate::validation::WatchOutcome;
    use chrono::{Duration, Utc};

    async fn open_payment(harness: &Harness, buyer: UserId) -> PendingPayment {
        let batch = harness.paid_batch(SELLER, "49.00", &["a", "b"]).await;
        match harness.workflow.request_access(buyer, &batch.id).await.unwrap() {
            AccessOutcome::AwaitingPayment(payment) => payment,
            other => panic!("expected a pending payment, got {other:?}"),
        }
    }

    async fn confirmed_payment(harness: &Harness) -> PendingPayment {
        let payment = open_payment(harness, BUYER).await;
        harness
            .workflow
            .confirm_payment(BUYER, &payment.id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_paid_request_sends_instructions() {
        let harness = Harness::new().await;
        let payment = open_payment(&harness, BUYER).await;

        assert_eq!(payment.unique_amount.to_string(), "49.01");
        assert_eq!(payment.status, PaymentStatus::AwaitingBuyerConfirmation);

        let messages = harness.channel.messages_to(BUYER.0).await;
        let instructions = messages.last().unwrap();
        assert!(instructions.text.contains("49.01"));
        assert_eq!(
            instructions.callbacks(),
            vec![format!("i_paid_{}", payment.id).as_str()]
        );
        let pay_url = instructions
            .actions
            .iter()
            .find_map(|a| match &a.target {
                ActionTarget::Url(url) => Some(url.clone()),
                _ => None,
            })
            .unwrap();
        assert!(pay_url.starts_with("https://pay.example/checkout?amount=49.01&upi=seller%40upi"));

        let jobs = harness.registry.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::ExpireConfirmation);
        assert_eq!(Some(jobs[0].id.clone()), payment.confirm_job);
    }

    #[tokio::test]
    async fn test_free_request_delivers_immediately() {
        let harness = Harness::new().await;
        let batch = harness.free_batch(SELLER, &["x", "y"]).await;

        let outcome = harness.workflow.request_access(BUYER, &batch.id).await.unwrap();
        let AccessOutcome::Delivered(report) = outcome else {
            panic!("free batch was not delivered");
        };
        assert_eq!(report.delivered_count, 2);
        assert!(report.success);
        assert!(harness.registry.list_payments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_batch_is_reported() {
        let harness = Harness::new().await;
        let err = harness
            .workflow
            .request_access(BUYER, &crate::types::BatchId::new("missing00000"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { what: "batch", .. }));
        assert_eq!(harness.channel.messages_to(BUYER.0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_amounts_ask_buyer_to_retry() {
        let mut config = test_config();
        config.payment.amount_offset_cap = 1;
        let harness = Harness::with_config(config).await;
        let batch = harness.paid_batch(SELLER, "10.00", &["a"]).await;

        harness.workflow.request_access(BUYER, &batch.id).await.unwrap();
        let err = harness
            .workflow
            .request_access(UserId(301), &batch.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
        let notice = harness.channel.messages_to(301).await;
        assert!(notice[0].text.contains("try again"));

        // The losing request left no timer behind
        assert_eq!(harness.registry.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_swaps_timers_and_prompts_seller() {
        let harness = Harness::new().await;
        let opened = open_payment(&harness, BUYER).await;
        let payment = harness
            .workflow
            .confirm_payment(BUYER, &opened.id)
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::AwaitingSellerApproval);
        let jobs = harness.registry.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::ExpireApproval);

        let prompt = harness.channel.messages_to(SELLER.0).await;
        assert_eq!(prompt.len(), 1);
        assert_eq!(
            prompt[0].callbacks(),
            vec![
                format!("approve_{}", payment.id).as_str(),
                format!("decline_{}", payment.id).as_str()
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_confirmation_timer_is_a_no_op() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;
        let buyer_messages = harness.channel.messages_to(BUYER.0).await.len();

        // The cancelled job fires anyway, as after a crash
        let fired = harness
            .workflow
            .expire_confirmation(&payment.id)
            .await
            .unwrap();
        assert!(!fired);

        let stored = harness.registry.get_payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::AwaitingSellerApproval);
        assert_eq!(
            harness.channel.messages_to(BUYER.0).await.len(),
            buyer_messages
        );
    }

    #[tokio::test]
    async fn test_double_confirmation_is_rejected() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;
        let err = harness
            .workflow
            .confirm_payment(BUYER, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stranger = harness
            .workflow
            .confirm_payment(UserId(999), &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(stranger, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_unconfirmed_payment_expires() {
        let harness = Harness::new().await;
        let payment = open_payment(&harness, BUYER).await;

        let report = harness
            .dispatcher()
            .tick(Utc::now() + Duration::minutes(31))
            .await
            .unwrap();
        assert_eq!(report.fired, 1);
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());

        let last = harness.channel.messages_to(BUYER.0).await.pop().unwrap();
        assert!(last.text.contains("payment window has closed"));
        let ActionTarget::Url(link) = &last.actions[0].target else {
            panic!("expiry notice carries no link");
        };
        assert_eq!(
            link,
            &format!("https://t.me/testbot?start={}", payment.batch_id)
        );
    }

    #[tokio::test]
    async fn test_unanswered_approval_expires_for_both_sides() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;

        let report = harness
            .dispatcher()
            .tick(Utc::now() + Duration::hours(24) + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(report.fired, 1);
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());

        let buyer_last = harness.channel.messages_to(BUYER.0).await.pop().unwrap();
        assert!(buyer_last.text.contains("did not review"));
        let seller_last = harness.channel.messages_to(SELLER.0).await.pop().unwrap();
        assert!(seller_last.text.contains("expired without a decision"));
        assert!(harness.registry.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_approval_delivers_and_frees_amount() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;

        let resolution = harness.workflow.approve(SELLER, &payment.id).await.unwrap();
        assert_eq!(resolution.provenance, Provenance::Manual);
        assert_eq!(resolution.delivery.delivered_count, 2);
        assert!(resolution.delivery.success);
        assert_eq!(harness.channel.copies_to(BUYER.0).await.len(), 2);
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());

        let summary = harness.channel.messages_to(SELLER.0).await.pop().unwrap();
        assert!(summary.text.contains("Resolved by: Seller (Manual)"));

        // Only the cleanup timer remains
        let jobs = harness.registry.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::DeleteDelivered);

        // The amount is free again
        let next = open_payment(&harness, UserId(301)).await;
        assert_eq!(next.unique_amount, payment.unique_amount);
    }

    #[tokio::test]
    async fn test_second_approval_finds_nothing() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;
        harness.workflow.approve(SELLER, &payment.id).await.unwrap();

        let err = harness
            .workflow
            .approve(SELLER, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(harness.channel.copies_to(BUYER.0).await.len(), 2);
    }

    #[tokio::test]
    async fn test_approval_by_stranger_is_rejected() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;

        let err = harness
            .workflow
            .approve(UserId(999), &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let stored = harness.registry.get_payment(&payment.id).await.unwrap();
        assert_eq!(stored.unwrap().status, PaymentStatus::AwaitingSellerApproval);
    }

    #[tokio::test]
    async fn test_approval_requires_buyer_confirmation() {
        let harness = Harness::new().await;
        let payment = open_payment(&harness, BUYER).await;
        let err = harness
            .workflow
            .approve(SELLER, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_decline_notifies_buyer() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;

        harness.workflow.decline(SELLER, &payment.id).await.unwrap();
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());
        assert!(harness.registry.list_jobs().await.unwrap().is_empty());
        let last = harness.channel.messages_to(BUYER.0).await.pop().unwrap();
        assert!(last.text.contains("could not verify"));
        assert!(harness.channel.copies_to(BUYER.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_payment_is_removed() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;
        harness.registry.delete_batch(&payment.batch_id).await.unwrap();

        let err = harness
            .workflow
            .approve(SELLER, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());
        assert!(harness.registry.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_buyer_still_resolves() {
        let harness = Harness::new().await;
        let payment = confirmed_payment(&harness).await;
        harness.channel.mark_unreachable(BUYER.0).await;

        let resolution = harness.workflow.approve(SELLER, &payment.id).await.unwrap();
        assert!(!resolution.delivery.success);
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());
        let summary = harness.channel.messages_to(SELLER.0).await.pop().unwrap();
        assert!(summary.text.contains("Delivery incomplete"));
    }

    #[tokio::test]
    async fn test_controls_route_to_transitions() {
        let harness = Harness::new().await;
        let payment = open_payment(&harness, BUYER).await;

        harness
            .workflow
            .handle_control(BUYER, &format!("i_paid_{}", payment.id))
            .await
            .unwrap();
        harness
            .workflow
            .handle_control(SELLER, &format!("approve_{}", payment.id))
            .await
            .unwrap();
        assert!(harness.registry.get_payment(&payment.id).await.unwrap().is_none());

        let bogus = harness.workflow.handle_control(BUYER, "nonsense").await;
        assert!(matches!(bogus, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn test_membership_gate_defers_access() {
        let mut config = test_config();
        config.membership.channel = Some("@updates".into());
        config.membership.check_interval_secs = 0;
        let harness = Harness::with_config(config).await;
        let batch = harness.free_batch(SELLER, &["a"]).await;

        let outcome = harness.workflow.request_access(BUYER, &batch.id).await.unwrap();
        assert_eq!(outcome, AccessOutcome::MembershipRequired);
        let prompt = harness.channel.messages_to(BUYER.0).await.pop().unwrap();
        assert_eq!(
            prompt.callbacks(),
            vec![format!("check_join_{}", batch.id).as_str()]
        );

        harness.channel.add_member(BUYER).await;
        let watch = harness.workflow.watch_membership(BUYER, batch.id.clone());
        assert_eq!(watch.join().await, WatchOutcome::Joined);
        assert_eq!(harness.channel.copies_to(BUYER.0).await.len(), 1);
    }
}
