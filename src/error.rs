//! Error Module
//!
//! One error type for the whole crate. The first six variants are the domain
//! taxonomy the approval workflow turns into user-facing messages; the rest
//! wrap infrastructure failures.

use crate::channel::ChannelError;
use crate::types::UserId;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Batch, payment or session absent
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    /// Caller does not own the record it tried to change
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The record changed underneath a conditional write
    #[error("conflict: {0}")]
    Conflict(String),

    /// No free payable amount in the configured offset range
    #[error("no free payable amount above {base} within {cap} offsets")]
    ResourceExhausted { base: Decimal, cap: u32 },

    /// Recipient blocked the bot or was deactivated
    #[error("recipient {0} is unreachable")]
    RecipientUnreachable(UserId),

    /// A record references something that no longer exists
    #[error("integrity fault: {0}")]
    Integrity(String),

    /// Rejected input (empty batch, price not positive, bad link)
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("channel error: {0}")]
    Channel(ChannelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::RecipientUnreachable(chat) => Error::RecipientUnreachable(UserId(chat)),
            other => Error::Channel(other),
        }
    }
}
