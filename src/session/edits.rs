use super::drafts::MAX_WRITE_ATTEMPTS;
use crate::batch::parse_batch_id;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{BatchId, EditSession, FileBatch, FileRef, MessageRef, UserId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Owner-exclusive working copies of published batches
///
/// Opening a session snapshots the batch's file list; nothing touches the
/// batch until `save`, which swaps the list in atomically and ends the
/// session. Every operation checks the caller against the session owner.
pub struct EditStore {
    registry: Arc<Registry>,
    ttl: Duration,
}

impl EditStore {
    pub fn new(registry: Arc<Registry>, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    /// Starts (or restarts) editing a batch
    ///
    /// # Arguments
    /// * `requester` - Must be the batch owner
    /// * `batch_ref` - Bare batch id or share link
    /// * `now` - Request time
    ///
    /// # Returns
    /// The fresh session, `Invalid` for an unreadable reference, `NotFound`
    /// for an unknown batch, `Unauthorized` for anyone but the owner
    pub async fn open(
        &self,
        requester: UserId,
        batch_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<EditSession> {
        let batch_id = parse_batch_id(batch_ref)
            .ok_or_else(|| Error::invalid(format!("not a batch id or link: {batch_ref}")))?;
        let batch = self
            .registry
            .get_batch(&batch_id)
            .await?
            .ok_or_else(|| Error::not_found("batch", &batch_id))?;
        if batch.owner != requester {
            return Err(Error::unauthorized(format!(
                "{requester} does not own batch {batch_id}"
            )));
        }

        let fresh = EditSession {
            batch_id: batch.id.clone(),
            owner: batch.owner,
            files: batch.files,
            prompt: None,
            accepting_files: false,
            last_activity: now,
            expires_at: now + self.ttl,
            version: 1,
        };
        self.registry.upsert_edit(&fresh).await?;
        info!("Edit session opened on batch {} by {}", batch_id, requester);

        self.registry
            .get_edit(&batch_id)
            .await?
            .ok_or_else(|| Error::integrity(format!("edit session for {batch_id} vanished")))
    }

    /// Live session on `batch_id`, checked against `owner`
    pub async fn get(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        now: DateTime<Utc>,
    ) -> Result<EditSession> {
        let session = self
            .registry
            .get_edit(batch_id)
            .await?
            .filter(|session| session.expires_at > now)
            .ok_or_else(|| Error::not_found("edit session", batch_id))?;
        if session.owner != owner {
            return Err(Error::unauthorized(format!(
                "{owner} is not editing batch {batch_id}"
            )));
        }
        Ok(session)
    }

    /// Drops the file at `index` (zero based) from the working copy
    pub async fn remove_file(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<EditSession> {
        self.modify(owner, batch_id, now, |session| {
            if index >= session.files.len() {
                return Err(Error::invalid(format!(
                    "no file #{} in a list of {}",
                    index + 1,
                    session.files.len()
                )));
            }
            session.files.remove(index);
            Ok(())
        })
        .await
    }

    /// Routes the owner's next incoming files into this session
    pub async fn begin_adding(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        now: DateTime<Utc>,
    ) -> Result<EditSession> {
        self.modify(owner, batch_id, now, |session| {
            session.accepting_files = true;
            Ok(())
        })
        .await
    }

    /// Appends `file` to the owner's session that is accepting files
    ///
    /// # Returns
    /// `None` if the owner has no session in adding mode
    pub async fn add_file(
        &self,
        owner: UserId,
        file: FileRef,
        now: DateTime<Utc>,
    ) -> Result<Option<EditSession>> {
        let Some(session) = self.registry.find_accepting_edit(owner, now).await? else {
            return Ok(None);
        };
        let updated = self
            .modify(owner, &session.batch_id, now, |session| {
                session.files.push(file.clone());
                Ok(())
            })
            .await?;
        Ok(Some(updated))
    }

    /// Records the prompt currently showing the session
    ///
    /// # Returns
    /// The prompt it replaces
    pub async fn set_prompt(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        prompt: MessageRef,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRef>> {
        let previous = self.get(owner, batch_id, now).await?.prompt;
        self.modify(owner, batch_id, now, |session| {
            session.prompt = Some(prompt);
            Ok(())
        })
        .await?;
        Ok(previous)
    }

    /// Writes the working copy back to the batch and ends the session
    ///
    /// # Returns
    /// The batch as it now stands
    pub async fn save(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        now: DateTime<Utc>,
    ) -> Result<FileBatch> {
        let session = self.get(owner, batch_id, now).await?;
        if session.files.is_empty() {
            return Err(Error::invalid("a batch needs at least one file"));
        }
        if !self.registry.save_edit(&session).await? {
            return Err(Error::conflict(format!(
                "edit session on {batch_id} changed while saving"
            )));
        }
        info!(
            "Batch {} saved by {} with {} files",
            batch_id,
            owner,
            session.files.len()
        );

        self.registry
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| Error::integrity(format!("batch {batch_id} vanished after save")))
    }

    /// Ends the session without touching the batch
    pub async fn cancel(&self, owner: UserId, batch_id: &BatchId, now: DateTime<Utc>) -> Result<()> {
        self.get(owner, batch_id, now).await?;
        if self.registry.delete_edit(batch_id, owner).await? {
            debug!("Edit session on {} cancelled", batch_id);
        }
        Ok(())
    }

    async fn modify<F>(
        &self,
        owner: UserId,
        batch_id: &BatchId,
        now: DateTime<Utc>,
        mut change: F,
    ) -> Result<EditSession>
    where
        F: FnMut(&mut EditSession) -> Result<()>,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.get(owner, batch_id, now).await?;
            let mut next = current.clone();
            change(&mut next)?;
            next.last_activity = now;
            next.expires_at = now + self.ttl;
            next.version += 1;
            if self
                .registry
                .update_edit_if_version(&next, current.version)
                .await?
            {
                return Ok(next);
            }
        }
        Err(Error::conflict(format!(
            "edit session on {batch_id} is too contended"
        )))
    }
}
