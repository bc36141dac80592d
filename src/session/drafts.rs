use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{DraftSession, FileRef, MessageRef, UserId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Optimistic writes give up after this many lost races
pub(super) const MAX_WRITE_ATTEMPTS: usize = 8;

/// Per-creator drafts of not-yet-published batches
///
/// Every write is version guarded, so a file arriving while the menu is being
/// replaced (two inbound events for the same creator) cannot drop either
/// change. A draft whose TTL elapsed is treated as absent and replaced.
pub struct DraftStore {
    registry: Arc<Registry>,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(registry: Arc<Registry>, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    /// Live draft of `creator`, if any
    pub async fn get(&self, creator: UserId, now: DateTime<Utc>) -> Result<Option<DraftSession>> {
        Ok(self
            .registry
            .get_draft(creator)
            .await?
            .filter(|draft| draft.expires_at > now))
    }

    /// Appends `file` to the creator's draft, starting one if needed
    ///
    /// # Returns
    /// The draft as stored after the append
    pub async fn add_file(
        &self,
        creator: UserId,
        file: FileRef,
        now: DateTime<Utc>,
    ) -> Result<DraftSession> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            match self.registry.get_draft(creator).await? {
                Some(stale) if stale.expires_at <= now => {
                    self.registry
                        .delete_draft_if_version(creator, stale.version)
                        .await?;
                }
                Some(current) => {
                    let mut next = current.clone();
                    next.files.push(file.clone());
                    self.touch(&mut next, now);
                    if self
                        .registry
                        .update_draft_if_version(&next, current.version)
                        .await?
                    {
                        return Ok(next);
                    }
                }
                None => {
                    let draft = DraftSession {
                        creator,
                        files: vec![file.clone()],
                        menu: None,
                        last_activity: now,
                        expires_at: now + self.ttl,
                        version: 1,
                    };
                    if self.registry.insert_draft_if_absent(&draft).await? {
                        debug!("Draft started for {}", creator);
                        return Ok(draft);
                    }
                }
            }
        }
        Err(Error::conflict(format!("draft of {creator} is too contended")))
    }

    /// Records `menu` as the creator's current menu prompt
    ///
    /// # Returns
    /// The prompt it replaces, which the caller should delete from the chat
    pub async fn replace_menu(
        &self,
        creator: UserId,
        menu: MessageRef,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRef>> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .get(creator, now)
                .await?
                .ok_or_else(|| Error::not_found("draft", creator))?;
            let mut next = current.clone();
            next.menu = Some(menu);
            self.touch(&mut next, now);
            if self
                .registry
                .update_draft_if_version(&next, current.version)
                .await?
            {
                return Ok(current.menu);
            }
        }
        Err(Error::conflict(format!("draft of {creator} is too contended")))
    }

    /// Discards the creator's draft
    ///
    /// # Returns
    /// The discarded draft, `None` if there was nothing live to discard
    pub async fn close(&self, creator: UserId, now: DateTime<Utc>) -> Result<Option<DraftSession>> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.get(creator, now).await? else {
                return Ok(None);
            };
            if self
                .registry
                .delete_draft_if_version(creator, current.version)
                .await?
            {
                debug!("Draft of {} closed with {} files", creator, current.files.len());
                return Ok(Some(current));
            }
        }
        Err(Error::conflict(format!("draft of {creator} is too contended")))
    }

    fn touch(&self, draft: &mut DraftSession, now: DateTime<Utc>) {
        draft.last_activity = now;
        draft.expires_at = now + self.ttl;
        draft.version += 1;
    }
}
