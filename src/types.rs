use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase alphanumeric token used for opaque record ids
pub fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| TOKEN_CHARSET[rng.random_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Chat-platform user id (creators, sellers and buyers alike)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! token_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(random_token($len))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

token_id!(
    /// Opaque batch id, embedded in share links
    BatchId,
    12
);
token_id!(
    /// Pending payment id, carried by the buyer and seller controls
    PaymentId,
    16
);

/// Scheduled job id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a stored file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// Handle to a message that was sent through the messaging channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: i64,
    pub message_id: i64,
}

/// Where buyers send money for a paid batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    /// Payment address (UPI id)
    pub reference: String,
    /// Display name shown on the payment page
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pricing {
    Free,
    Paid { price: Decimal, payee: Payee },
}

/// A published, shareable collection of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBatch {
    pub id: BatchId,
    pub owner: UserId,
    pub files: Vec<FileRef>,
    pub pricing: Pricing,
    pub created_at: DateTime<Utc>,
}

impl FileBatch {
    pub fn is_paid(&self) -> bool {
        matches!(self.pricing, Pricing::Paid { .. })
    }
}

/// Files a creator has sent but not yet published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSession {
    pub creator: UserId,
    pub files: Vec<FileRef>,
    /// Most recent menu prompt shown to the creator
    pub menu: Option<MessageRef>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Bumped on every write; guards conditional updates
    pub version: i64,
}

/// Owner-exclusive working copy of a batch's file list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub batch_id: BatchId,
    pub owner: UserId,
    pub files: Vec<FileRef>,
    pub prompt: Option<MessageRef>,
    /// Incoming files from the owner are appended here instead of a draft
    pub accepting_files: bool,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    AwaitingBuyerConfirmation,
    AwaitingSellerApproval,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::AwaitingBuyerConfirmation => "awaiting_buyer_confirmation",
            PaymentStatus::AwaitingSellerApproval => "awaiting_seller_approval",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "awaiting_buyer_confirmation" => Some(PaymentStatus::AwaitingBuyerConfirmation),
            "awaiting_seller_approval" => Some(PaymentStatus::AwaitingSellerApproval),
            _ => None,
        }
    }
}

/// A purchase between "buyer asked" and "resolved or expired"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayment {
    pub id: PaymentId,
    pub batch_id: BatchId,
    pub buyer: UserId,
    /// Globally unique while this record exists
    pub unique_amount: Decimal,
    pub status: PaymentStatus,
    pub confirm_job: Option<JobId>,
    pub approval_job: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    ExpireConfirmation,
    ExpireApproval,
    DeleteDelivered,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ExpireConfirmation => "expire_confirmation",
            JobKind::ExpireApproval => "expire_approval",
            JobKind::DeleteDelivered => "delete_delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expire_confirmation" => Some(JobKind::ExpireConfirmation),
            "expire_approval" => Some(JobKind::ExpireApproval),
            "delete_delivered" => Some(JobKind::DeleteDelivered),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, time-triggered callback
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub id: JobId,
    pub kind: JobKind,
    pub fire_at: DateTime<Utc>,
    /// Ids needed to re-hydrate the handler; never live handles
    pub payload: serde_json::Value,
    pub lease_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Payload of the two payment expiry jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentJob {
    pub payment_id: PaymentId,
}

/// Payload of a post-delivery cleanup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupJob {
    pub chat: i64,
    pub message_ids: Vec<i64>,
}

/// Who resolved a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Manual,
    Automated,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Manual => f.write_str("Seller (Manual)"),
            Provenance::Automated => f.write_str("Automation"),
        }
    }
}

/// Canonical two-decimal form of a payable amount
pub fn normalize_amount(amount: Decimal) -> Decimal {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_generated_ids_use_lowercase_alphanumerics() {
        let id = BatchId::generate();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().bytes().all(|b| TOKEN_CHARSET.contains(&b)));
        assert_eq!(PaymentId::generate().as_str().len(), 16);
    }

    #[test]
    fn test_amounts_normalize_to_two_places() {
        let amount = normalize_amount(Decimal::from_str("10.1").unwrap());
        assert_eq!(amount.to_string(), "10.10");
        let amount = normalize_amount(Decimal::from(7));
        assert_eq!(amount.to_string(), "7.00");
    }

    #[test]
    fn test_status_and_kind_names_parse_back() {
        for status in [
            PaymentStatus::AwaitingBuyerConfirmation,
            PaymentStatus::AwaitingSellerApproval,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobKind::parse("delete_delivered"), Some(JobKind::DeleteDelivered));
        assert_eq!(JobKind::parse("bogus"), None);
    }
}
