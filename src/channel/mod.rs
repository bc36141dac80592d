//! Messaging Channel Module
//!
//! The chat platform is an external collaborator. Everything this crate needs
//! from it goes through the [`MessageChannel`] trait so the approval workflow,
//! delivery service and membership gate never hold a concrete client.
//!
//! Errors distinguish an unreachable recipient (blocked or deactivated, never
//! worth retrying) from transient failures.

mod memory;

pub use memory::{MemoryChannel, Sent};

use crate::types::{FileRef, MessageRef, UserId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("chat {0} blocked the bot or was deactivated")]
    RecipientUnreachable(i64),
    #[error("transient channel failure: {0}")]
    Transient(String),
}

/// Target of an inline control attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    /// Opaque callback data routed back to the bot when pressed
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub label: String,
    pub target: ActionTarget,
}

impl Action {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ActionTarget::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ActionTarget::Url(url.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub actions: Vec<Action>,
    /// Message id (in the same chat) this one replies to
    pub reply_to: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
            reply_to: None,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// Callback data of every control on this message
    pub fn callbacks(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match &a.target {
                ActionTarget::Callback(data) => Some(data.as_str()),
                ActionTarget::Url(_) => None,
            })
            .collect()
    }
}

/// Result of copying a stored file into a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedMessage {
    pub message: MessageRef,
    /// Whether the copied item can carry a caption (documents, video, photos, audio)
    pub captionable: bool,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_message(
        &self,
        chat: i64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError>;

    async fn copy_message(&self, chat: i64, from: &FileRef) -> Result<CopiedMessage, ChannelError>;

    /// Replace the text (or caption, for media) of a sent message
    async fn edit_message(&self, message: MessageRef, text: String) -> Result<(), ChannelError>;

    async fn delete_messages(&self, chat: i64, message_ids: &[i64]) -> Result<(), ChannelError>;

    async fn get_chat_member(&self, channel: &str, user: UserId)
    -> Result<Membership, ChannelError>;
}
