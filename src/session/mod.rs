//! Session Store Module
//!
//! Conversational state that outlives a single inbound event:
//! - Drafts: files a creator has sent but not yet published
//! - Edit sessions: an owner's working copy of a published batch
//!
//! Both are TTL-bearing registry records; the dispatcher purges the expired ones.

mod drafts;
mod edits;


pub use drafts::DraftStore;
pub use edits::EditStore;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::registry::Registry;
use crate::types::{BatchId, FileRef, UserId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Where an incoming file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDestination {
    Draft { count: usize },
    Edit { batch_id: BatchId, count: usize },
}

pub struct SessionStore {
    pub drafts: DraftStore,
    pub edits: EditStore,
}

impl SessionStore {
    pub fn new(registry: Arc<Registry>, config: &SessionConfig) -> Self {
        Self {
            drafts: DraftStore::new(registry.clone(), config.draft_ttl()),
            edits: EditStore::new(registry, config.edit_ttl()),
        }
    }

    /// File sent by `creator`: appended to an edit session in adding mode if
    /// there is one, to the creator's draft otherwise
    pub async fn receive_file(
        &self,
        creator: UserId,
        file: FileRef,
        now: DateTime<Utc>,
    ) -> Result<FileDestination> {
        if let Some(session) = self.edits.add_file(creator, file.clone(), now).await? {
            return Ok(FileDestination::Edit {
                count: session.files.len(),
                batch_id: session.batch_id,
            });
        }
        let draft = self.drafts.add_file(creator, file, now).await?;
        Ok(FileDestination::Draft {
            count: draft.files.len(),
        })
    }
}
