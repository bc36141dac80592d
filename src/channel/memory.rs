use super::{ChannelError, CopiedMessage, Membership, MessageChannel, OutgoingMessage};
use crate::types::{FileRef, MessageRef, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// One recorded channel call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message {
        chat: i64,
        message_id: i64,
        message: OutgoingMessage,
    },
    Copy {
        chat: i64,
        message_id: i64,
        from: FileRef,
    },
    Edit {
        message: MessageRef,
        text: String,
    },
    Delete {
        chat: i64,
        message_ids: Vec<i64>,
    },
}

#[derive(Default)]
struct Inner {
    next_message_id: i64,
    log: Vec<Sent>,
    unreachable: HashSet<i64>,
    /// Remaining successful copies before a chat turns unreachable
    copies_before_block: HashMap<i64, usize>,
    failing_files: HashSet<FileRef>,
    /// Transient failures still to hand out for plain messages, per chat
    failing_messages: HashMap<i64, usize>,
    uncaptionable: HashSet<FileRef>,
    members: HashSet<UserId>,
}

/// In-process channel that records every call.
///
/// Allocates message ids sequentially. Chats can be made unreachable, and
/// single files or plain messages can be made to fail.
pub struct MemoryChannel {
    inner: RwLock<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn mark_unreachable(&self, chat: i64) {
        self.inner.write().await.unreachable.insert(chat);
    }

    /// Let `copies` more files through to `chat`, then behave as if blocked
    pub async fn block_after(&self, chat: i64, copies: usize) {
        self.inner
            .write()
            .await
            .copies_before_block
            .insert(chat, copies);
    }

    /// Make the next `count` plain messages to `chat` fail transiently
    pub async fn fail_messages(&self, chat: i64, count: usize) {
        self.inner.write().await.failing_messages.insert(chat, count);
    }

    pub async fn fail_file(&self, file: FileRef) {
        self.inner.write().await.failing_files.insert(file);
    }

    pub async fn set_uncaptionable(&self, file: FileRef) {
        self.inner.write().await.uncaptionable.insert(file);
    }

    pub async fn add_member(&self, user: UserId) {
        self.inner.write().await.members.insert(user);
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.inner.read().await.log.clone()
    }

    /// Plain messages sent to `chat`, in order
    pub async fn messages_to(&self, chat: i64) -> Vec<OutgoingMessage> {
        self.inner
            .read()
            .await
            .log
            .iter()
            .filter_map(|s| match s {
                Sent::Message {
                    chat: c, message, ..
                } if *c == chat => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Files copied into `chat`, in order
    pub async fn copies_to(&self, chat: i64) -> Vec<FileRef> {
        self.inner
            .read()
            .await
            .log
            .iter()
            .filter_map(|s| match s {
                Sent::Copy { chat: c, from, .. } if *c == chat => Some(from.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn deletions(&self) -> Vec<(i64, Vec<i64>)> {
        self.inner
            .read()
            .await
            .log
            .iter()
            .filter_map(|s| match s {
                Sent::Delete { chat, message_ids } => Some((*chat, message_ids.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    fn check_reachable(&self, chat: i64) -> Result<(), ChannelError> {
        if self.unreachable.contains(&chat) {
            return Err(ChannelError::RecipientUnreachable(chat));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send_message(
        &self,
        chat: i64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError> {
        let mut inner = self.inner.write().await;
        inner.check_reachable(chat)?;
        if let Some(remaining) = inner.failing_messages.get_mut(&chat) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChannelError::Transient("send rejected".into()));
            }
        }
        let message_id = inner.next_id();
        debug!(chat, message_id, "memory channel: send");
        inner.log.push(Sent::Message {
            chat,
            message_id,
            message,
        });
        Ok(MessageRef { chat, message_id })
    }

    async fn copy_message(&self, chat: i64, from: &FileRef) -> Result<CopiedMessage, ChannelError> {
        let mut inner = self.inner.write().await;
        inner.check_reachable(chat)?;
        if let Some(remaining) = inner.copies_before_block.get_mut(&chat) {
            if *remaining == 0 {
                inner.unreachable.insert(chat);
                return Err(ChannelError::RecipientUnreachable(chat));
            }
            *remaining -= 1;
        }
        if inner.failing_files.contains(from) {
            return Err(ChannelError::Transient(format!("source {} is gone", from.0)));
        }
        let message_id = inner.next_id();
        let captionable = !inner.uncaptionable.contains(from);
        debug!(chat, message_id, file = %from.0, "memory channel: copy");
        inner.log.push(Sent::Copy {
            chat,
            message_id,
            from: from.clone(),
        });
        Ok(CopiedMessage {
            message: MessageRef { chat, message_id },
            captionable,
            caption: None,
        })
    }

    async fn edit_message(&self, message: MessageRef, text: String) -> Result<(), ChannelError> {
        let mut inner = self.inner.write().await;
        inner.check_reachable(message.chat)?;
        inner.log.push(Sent::Edit { message, text });
        Ok(())
    }

    async fn delete_messages(&self, chat: i64, message_ids: &[i64]) -> Result<(), ChannelError> {
        let mut inner = self.inner.write().await;
        debug!(chat, count = message_ids.len(), "memory channel: delete");
        inner.log.push(Sent::Delete {
            chat,
            message_ids: message_ids.to_vec(),
        });
        Ok(())
    }

    async fn get_chat_member(
        &self,
        _channel: &str,
        user: UserId,
    ) -> Result<Membership, ChannelError> {
        let inner = self.inner.read().await;
        if inner.members.contains(&user) {
            Ok(Membership::Member)
        } else {
            Ok(Membership::NotMember)
        }
    }
}
