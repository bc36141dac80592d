use super::batches::{files_from_json, files_to_json, insert_batch_on};
use super::database::{Registry, from_millis, to_millis};
use crate::error::Result;
use crate::types::{BatchId, DraftSession, EditSession, FileBatch, MessageRef, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

const DRAFT_COLUMNS: &str =
    "creator_id, file_refs, menu_chat, menu_message, last_activity, expires_at, version";
const EDIT_COLUMNS: &str = "batch_id, owner_id, file_refs, prompt_chat, prompt_message, accepting_files, last_activity, expires_at, version";

impl Registry {
    pub async fn get_draft(&self, creator: UserId) -> Result<Option<DraftSession>> {
        let row = sqlx::query(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_sessions WHERE creator_id = ?"
        ))
        .bind(creator.0)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(draft_from_row).transpose()
    }

    pub async fn insert_draft_if_absent(&self, draft: &DraftSession) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO draft_sessions
                (creator_id, file_refs, menu_chat, menu_message, last_activity, expires_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (creator_id) DO NOTHING
            "#,
        )
        .bind(draft.creator.0)
        .bind(files_to_json(&draft.files)?)
        .bind(draft.menu.map(|m| m.chat))
        .bind(draft.menu.map(|m| m.message_id))
        .bind(to_millis(draft.last_activity))
        .bind(to_millis(draft.expires_at))
        .bind(draft.version)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Overwrites the draft with `draft` if it is still at version `expected`
    pub async fn update_draft_if_version(&self, draft: &DraftSession, expected: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE draft_sessions
            SET file_refs = ?, menu_chat = ?, menu_message = ?, last_activity = ?, expires_at = ?, version = ?
            WHERE creator_id = ? AND version = ?
            "#,
        )
        .bind(files_to_json(&draft.files)?)
        .bind(draft.menu.map(|m| m.chat))
        .bind(draft.menu.map(|m| m.message_id))
        .bind(to_millis(draft.last_activity))
        .bind(to_millis(draft.expires_at))
        .bind(draft.version)
        .bind(draft.creator.0)
        .bind(expected)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_draft_if_version(&self, creator: UserId, version: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM draft_sessions WHERE creator_id = ? AND version = ?")
                .bind(creator.0)
                .bind(version)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Turns a draft into a batch in one transaction
    ///
    /// # Returns
    /// `false` (and nothing written) if the draft changed since it was read
    pub async fn publish_draft(&self, draft: &DraftSession, batch: &FileBatch) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let removed = sqlx::query("DELETE FROM draft_sessions WHERE creator_id = ? AND version = ?")
            .bind(draft.creator.0)
            .bind(draft.version)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_batch_on(&mut tx, batch).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_edit(&self, batch_id: &BatchId) -> Result<Option<EditSession>> {
        let row = sqlx::query(&format!(
            "SELECT {EDIT_COLUMNS} FROM edit_sessions WHERE batch_id = ?"
        ))
        .bind(batch_id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(edit_from_row).transpose()
    }

    /// Live edit session of `owner` that is collecting new files, if any
    pub async fn find_accepting_edit(
        &self,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<EditSession>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {EDIT_COLUMNS} FROM edit_sessions
            WHERE owner_id = ? AND accepting_files AND expires_at > ?
            ORDER BY last_activity DESC
            LIMIT 1
            "#
        ))
        .bind(owner.0)
        .bind(to_millis(now))
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(edit_from_row).transpose()
    }

    /// Creates the edit session for a batch, or resets the existing one
    pub async fn upsert_edit(&self, session: &EditSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO edit_sessions
                (batch_id, owner_id, file_refs, prompt_chat, prompt_message, accepting_files, last_activity, expires_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (batch_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                file_refs = excluded.file_refs,
                prompt_chat = excluded.prompt_chat,
                prompt_message = excluded.prompt_message,
                accepting_files = excluded.accepting_files,
                last_activity = excluded.last_activity,
                expires_at = excluded.expires_at,
                version = edit_sessions.version + 1
            "#,
        )
        .bind(session.batch_id.as_str())
        .bind(session.owner.0)
        .bind(files_to_json(&session.files)?)
        .bind(session.prompt.map(|m| m.chat))
        .bind(session.prompt.map(|m| m.message_id))
        .bind(session.accepting_files)
        .bind(to_millis(session.last_activity))
        .bind(to_millis(session.expires_at))
        .bind(session.version)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_edit_if_version(&self, session: &EditSession, expected: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE edit_sessions
            SET file_refs = ?, prompt_chat = ?, prompt_message = ?, accepting_files = ?,
                last_activity = ?, expires_at = ?, version = ?
            WHERE batch_id = ? AND owner_id = ? AND version = ?
            "#,
        )
        .bind(files_to_json(&session.files)?)
        .bind(session.prompt.map(|m| m.chat))
        .bind(session.prompt.map(|m| m.message_id))
        .bind(session.accepting_files)
        .bind(to_millis(session.last_activity))
        .bind(to_millis(session.expires_at))
        .bind(session.version)
        .bind(session.batch_id.as_str())
        .bind(session.owner.0)
        .bind(expected)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_edit(&self, batch_id: &BatchId, owner: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edit_sessions WHERE batch_id = ? AND owner_id = ?")
            .bind(batch_id.as_str())
            .bind(owner.0)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Replaces the batch's file list with the session's and ends the session
    ///
    /// Both writes happen in one transaction and are guarded: the session must
    /// still be at its read version and the batch must still belong to the
    /// session owner.
    ///
    /// # Returns
    /// `false` (and nothing written) if either guard failed
    pub async fn save_edit(&self, session: &EditSession) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let ended = sqlx::query(
            "DELETE FROM edit_sessions WHERE batch_id = ? AND owner_id = ? AND version = ?",
        )
        .bind(session.batch_id.as_str())
        .bind(session.owner.0)
        .bind(session.version)
        .execute(&mut *tx)
        .await?;
        if ended.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let replaced = sqlx::query("UPDATE file_batches SET file_refs = ? WHERE id = ? AND owner_id = ?")
            .bind(files_to_json(&session.files)?)
            .bind(session.batch_id.as_str())
            .bind(session.owner.0)
            .execute(&mut *tx)
            .await?;
        if replaced.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Removes draft and edit sessions whose inactivity TTL has elapsed
    ///
    /// # Returns
    /// Number of sessions removed
    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let now_ms = to_millis(now);
        let drafts = sqlx::query("DELETE FROM draft_sessions WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(self.pool())
            .await?;
        let edits = sqlx::query("DELETE FROM edit_sessions WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(self.pool())
            .await?;
        Ok(drafts.rows_affected() + edits.rows_affected())
    }
}

fn message_ref(chat: Option<i64>, message_id: Option<i64>) -> Option<MessageRef> {
    match (chat, message_id) {
        (Some(chat), Some(message_id)) => Some(MessageRef { chat, message_id }),
        _ => None,
    }
}

fn draft_from_row(row: &SqliteRow) -> Result<DraftSession> {
    Ok(DraftSession {
        creator: UserId(row.try_get("creator_id")?),
        files: files_from_json(&row.try_get::<String, _>("file_refs")?)?,
        menu: message_ref(row.try_get("menu_chat")?, row.try_get("menu_message")?),
        last_activity: from_millis(row.try_get("last_activity")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        version: row.try_get("version")?,
    })
}

fn edit_from_row(row: &SqliteRow) -> Result<EditSession> {
    Ok(EditSession {
        batch_id: BatchId::new(row.try_get::<String, _>("batch_id")?),
        owner: UserId(row.try_get("owner_id")?),
        files: files_from_json(&row.try_get::<String, _>("file_refs")?)?,
        prompt: message_ref(row.try_get("prompt_chat")?, row.try_get("prompt_message")?),
        accepting_files: row.try_get("accepting_files")?,
        last_activity: from_millis(row.try_get("last_activity")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        version: row.try_get("version")?,
    })
}
