use super::database::{Registry, from_millis, to_millis};
use crate::error::{Error, Result};
use crate::types::{JobId, JobKind, ScheduledJob};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

const JOB_COLUMNS: &str = "id, kind, fire_at, payload, lease_until, created_at";

impl Registry {
    pub async fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, kind, fire_at, payload, lease_until, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(to_millis(job.fire_at))
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.lease_until.map(to_millis))
        .bind(to_millis(job.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY fire_at, id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Claims up to `limit` jobs due at `now` that nobody else holds a lease on
    ///
    /// Each candidate is claimed with a conditional update, so concurrent
    /// dispatchers never lease the same job twice. A lease that runs out
    /// (dispatcher crashed mid-handler) makes the job claimable again.
    ///
    /// A row that cannot be decoded is logged and deleted so it cannot hold
    /// up the jobs due after it.
    pub async fn lease_due_jobs(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledJob>> {
        let now_ms = to_millis(now);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM scheduled_jobs
            WHERE fire_at <= ? AND (lease_until IS NULL OR lease_until <= ?)
            ORDER BY fire_at, id
            LIMIT ?
            "#
        ))
        .bind(now_ms)
        .bind(now_ms)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut job = match job_from_row(row) {
                Ok(job) => job,
                Err(e) => {
                    let id: String = row.try_get("id")?;
                    warn!("Dropping unreadable job {}: {}", id, e);
                    self.delete_job(&JobId::new(id)).await?;
                    continue;
                }
            };
            let claimed = sqlx::query(
                r#"
                UPDATE scheduled_jobs SET lease_until = ?
                WHERE id = ? AND (lease_until IS NULL OR lease_until <= ?)
                "#,
            )
            .bind(to_millis(lease_until))
            .bind(job.id.as_str())
            .bind(now_ms)
            .execute(self.pool())
            .await?;
            if claimed.rows_affected() == 1 {
                job.lease_until = Some(lease_until);
                leased.push(job);
            }
        }
        Ok(leased)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<ScheduledJob> {
    let id: String = row.try_get("id")?;
    let raw_kind: String = row.try_get("kind")?;
    let kind = JobKind::parse(&raw_kind)
        .ok_or_else(|| Error::integrity(format!("job {id} has unknown kind {raw_kind}")))?;
    let payload: String = row.try_get("payload")?;

    Ok(ScheduledJob {
        kind,
        fire_at: from_millis(row.try_get("fire_at")?)?,
        payload: serde_json::from_str(&payload)?,
        lease_until: row
            .try_get::<Option<i64>, _>("lease_until")?
            .map(from_millis)
            .transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
        id: JobId::new(id),
    })
}
