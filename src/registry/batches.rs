use super::database::{Registry, from_millis, to_millis};
use crate::error::{Error, Result};
use crate::types::{BatchId, FileBatch, FileRef, Payee, Pricing, UserId};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

const BATCH_COLUMNS: &str =
    "id, owner_id, file_refs, is_paid, price, payee_ref, payee_name, created_at";

impl Registry {
    pub async fn insert_batch(&self, batch: &FileBatch) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        insert_batch_on(&mut conn, batch).await
    }

    pub async fn get_batch(&self, id: &BatchId) -> Result<Option<FileBatch>> {
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM file_batches WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    pub async fn delete_batch(&self, id: &BatchId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_batches WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

pub(super) async fn insert_batch_on(
    conn: &mut sqlx::SqliteConnection,
    batch: &FileBatch,
) -> Result<()> {
    let (is_paid, price, payee_ref, payee_name) = match &batch.pricing {
        Pricing::Free => (false, None, None, None),
        Pricing::Paid { price, payee } => (
            true,
            Some(price.to_string()),
            Some(payee.reference.clone()),
            Some(payee.name.clone()),
        ),
    };

    sqlx::query(
        r#"
        INSERT INTO file_batches (id, owner_id, file_refs, is_paid, price, payee_ref, payee_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.as_str())
    .bind(batch.owner.0)
    .bind(files_to_json(&batch.files)?)
    .bind(is_paid)
    .bind(price)
    .bind(payee_ref)
    .bind(payee_name)
    .bind(to_millis(batch.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn batch_from_row(row: &SqliteRow) -> Result<FileBatch> {
    let id: String = row.try_get("id")?;
    let pricing = if row.try_get::<bool, _>("is_paid")? {
        let price: Option<String> = row.try_get("price")?;
        let price = price
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| Error::integrity(format!("batch {id} has an unreadable price: {e}")))?
            .ok_or_else(|| Error::integrity(format!("paid batch {id} has no price")))?;
        Pricing::Paid {
            price,
            payee: Payee {
                reference: row
                    .try_get::<Option<String>, _>("payee_ref")?
                    .unwrap_or_default(),
                name: row
                    .try_get::<Option<String>, _>("payee_name")?
                    .unwrap_or_default(),
            },
        }
    } else {
        Pricing::Free
    };

    Ok(FileBatch {
        owner: UserId(row.try_get("owner_id")?),
        files: files_from_json(&row.try_get::<String, _>("file_refs")?)?,
        pricing,
        created_at: from_millis(row.try_get("created_at")?)?,
        id: BatchId::new(id),
    })
}

pub(super) fn files_to_json(files: &[FileRef]) -> Result<String> {
    Ok(serde_json::to_string(files)?)
}

pub(super) fn files_from_json(raw: &str) -> Result<Vec<FileRef>> {
    Ok(serde_json::from_str(raw)?)
}
