//! Shared fixtures for workflow-level tests

use crate::approval::ApprovalWorkflow;
use crate::channel::MemoryChannel;
use crate::config::Config;
use crate::registry::Registry;
use crate::scheduler::Dispatcher;
use crate::types::{BatchId, FileBatch, FileRef, Payee, Pricing, UserId};
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) const SELLER: UserId = UserId(100);
pub(crate) const TRUSTED_SELLER: UserId = UserId(200);
pub(crate) const BUYER: UserId = UserId(300);
pub(crate) const SECRET: &str = "s3cret";

pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.links.bot_username = "testbot".into();
    config.payment.payment_page_url = "https://pay.example/checkout".into();
    config.automation.secret = SECRET.into();
    config.automation.trusted_owners = vec![TRUSTED_SELLER.0];
    config
}

pub(crate) struct Harness {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub channel: Arc<MemoryChannel>,
    pub workflow: Arc<ApprovalWorkflow>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let registry = Arc::new(Registry::in_memory().await.unwrap());
        let channel = Arc::new(MemoryChannel::new());
        let workflow = Arc::new(ApprovalWorkflow::new(
            registry.clone(),
            channel.clone(),
            &config,
        ));
        Self {
            config,
            registry,
            channel,
            workflow,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.registry.clone(),
            self.workflow.clone(),
            &self.config.scheduler,
        )
    }

    pub async fn paid_batch(&self, owner: UserId, price: &str, files: &[&str]) -> FileBatch {
        self.store(FileBatch {
            id: BatchId::generate(),
            owner,
            files: files.iter().map(|f| FileRef::new(*f)).collect(),
            pricing: Pricing::Paid {
                price: Decimal::from_str(price).unwrap(),
                payee: Payee {
                    reference: "seller@upi".into(),
                    name: "Seller".into(),
                },
            },
            created_at: Utc::now(),
        })
        .await
    }

    pub async fn free_batch(&self, owner: UserId, files: &[&str]) -> FileBatch {
        self.store(FileBatch {
            id: BatchId::generate(),
            owner,
            files: files.iter().map(|f| FileRef::new(*f)).collect(),
            pricing: Pricing::Free,
            created_at: Utc::now(),
        })
        .await
    }

    async fn store(&self, batch: FileBatch) -> FileBatch {
        self.registry.insert_batch(&batch).await.unwrap();
        batch
    }
}
