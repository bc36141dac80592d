use super::database::{Registry, from_millis, to_millis};
use crate::error::{Error, Result};
use crate::types::{
    BatchId, JobId, PaymentId, PaymentStatus, PendingPayment, UserId, normalize_amount,
};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

const PAYMENT_COLUMNS: &str =
    "id, batch_id, buyer_id, unique_amount, status, confirm_job_id, approval_job_id, created_at";

impl Registry {
    /// Inserts `payment` unless another pending payment already holds its amount
    ///
    /// This is the allocator's single conditional write: it relies on the
    /// UNIQUE constraint over `unique_amount`, so two racing claims for the
    /// same amount cannot both succeed.
    ///
    /// # Returns
    /// `true` if the record was inserted, `false` if the amount was taken
    pub async fn try_claim_payment(&self, payment: &PendingPayment) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_payments
                (id, batch_id, buyer_id, unique_amount, status, confirm_job_id, approval_job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (unique_amount) DO NOTHING
            "#,
        )
        .bind(payment.id.as_str())
        .bind(payment.batch_id.as_str())
        .bind(payment.buyer.0)
        .bind(amount_key(payment.unique_amount))
        .bind(payment.status.as_str())
        .bind(payment.confirm_job.as_ref().map(JobId::as_str))
        .bind(payment.approval_job.as_ref().map(JobId::as_str))
        .bind(to_millis(payment.created_at))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_payment(&self, id: &PaymentId) -> Result<Option<PendingPayment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    pub async fn find_payment_by_amount(&self, amount: Decimal) -> Result<Option<PendingPayment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments WHERE unique_amount = ?"
        ))
        .bind(amount_key(amount))
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    pub async fn list_payments(&self) -> Result<Vec<PendingPayment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM pending_payments ORDER BY created_at, unique_amount"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(payment_from_row).collect()
    }

    /// Moves a payment from `from` to `to`, recording the job armed for the new state
    ///
    /// # Returns
    /// `false` if the payment is gone or no longer in `from`
    pub async fn transition_payment(
        &self,
        id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        approval_job: Option<&JobId>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pending_payments
            SET status = ?, approval_job_id = COALESCE(?, approval_job_id)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(approval_job.map(JobId::as_str))
        .bind(id.as_str())
        .bind(from.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes a payment, optionally only while it is still in `status`
    ///
    /// Deleting the record releases its amount for the next allocation.
    pub async fn delete_payment_if(
        &self,
        id: &PaymentId,
        status: Option<PaymentStatus>,
    ) -> Result<bool> {
        let result = match status {
            Some(status) => {
                sqlx::query("DELETE FROM pending_payments WHERE id = ? AND status = ?")
                    .bind(id.as_str())
                    .bind(status.as_str())
                    .execute(self.pool())
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM pending_payments WHERE id = ?")
                    .bind(id.as_str())
                    .execute(self.pool())
                    .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }
}

/// Text form used for the uniqueness constraint
fn amount_key(amount: Decimal) -> String {
    normalize_amount(amount).to_string()
}

fn payment_from_row(row: &SqliteRow) -> Result<PendingPayment> {
    let id: String = row.try_get("id")?;
    let raw_amount: String = row.try_get("unique_amount")?;
    let unique_amount = Decimal::from_str(&raw_amount)
        .map_err(|e| Error::integrity(format!("payment {id} has an unreadable amount: {e}")))?;
    let raw_status: String = row.try_get("status")?;
    let status = PaymentStatus::parse(&raw_status)
        .ok_or_else(|| Error::integrity(format!("payment {id} has unknown status {raw_status}")))?;

    Ok(PendingPayment {
        batch_id: BatchId::new(row.try_get::<String, _>("batch_id")?),
        buyer: UserId(row.try_get("buyer_id")?),
        unique_amount,
        status,
        confirm_job: row
            .try_get::<Option<String>, _>("confirm_job_id")?
            .map(JobId::new),
        approval_job: row
            .try_get::<Option<String>, _>("approval_job_id")?
            .map(JobId::new),
        created_at: from_millis(row.try_get("created_at")?)?,
        id: PaymentId::new(id),
    })
}
