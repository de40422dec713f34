//! Durable job records: one row per unique job key.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, StateDb};
use super::types::JobRecord;
use crate::failure::FailurePayload;
use crate::jobs::JobState;

impl StateDb {
    /// Record the latest state of a job run. The input is only overwritten
    /// when a new one is given, so state updates keep the original input.
    /// Writes from a run older than the stored one are ignored.
    pub async fn record_job(
        &self,
        key: &str,
        run_id: u64,
        state: JobState,
        input: Option<&str>,
        output: Option<&FailurePayload>,
    ) -> Result<()> {
        let output_json = output.map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO jobs (job_key, run_id, state, input_json, output_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(job_key) DO UPDATE SET
                run_id = excluded.run_id,
                state = excluded.state,
                input_json = COALESCE(excluded.input_json, jobs.input_json),
                output_json = excluded.output_json,
                updated_at = excluded.updated_at
            WHERE excluded.run_id >= jobs.run_id
            "#,
        )
        .bind(key)
        .bind(run_id as i64)
        .bind(state.as_str())
        .bind(input)
        .bind(output_json)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, key: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT job_key, run_id, state, input_json, output_json, updated_at
            FROM jobs
            WHERE job_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_record(&row)?))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT job_key, run_id, state, input_json, output_json, updated_at
            FROM jobs
            ORDER BY job_key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn remove_job(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE job_key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Highest run id ever recorded, so run ids stay unique across restarts.
    pub async fn max_run_id(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(run_id), 0) AS max_run FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let max: i64 = row.get("max_run");
        Ok(max.max(0) as u64)
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
    let key: String = row.get("job_key");
    let run_id: i64 = row.get("run_id");
    let state_str: String = row.get("state");
    let input: Option<String> = row.get("input_json");
    let output_json: Option<String> = row.get("output_json");
    let updated_at: i64 = row.get("updated_at");

    let output = output_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str::<FailurePayload>)
        .transpose()?;

    // Unknown states read as Failed.
    let state = state_str.parse::<JobState>().unwrap_or_else(|e| {
        tracing::warn!(job_key = %key, run_id, error = %e, "treating job as failed");
        JobState::Failed
    });

    Ok(JobRecord {
        key,
        run_id: run_id.max(0) as u64,
        state,
        input,
        output,
        updated_at,
    })
}
