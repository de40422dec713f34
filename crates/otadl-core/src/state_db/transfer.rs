//! Transfer-state reads and writes.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, StateDb};
use super::types::TransferState;

impl StateDb {
    pub async fn load_transfer(&self, artifact_id: &str) -> Result<Option<TransferState>> {
        let row = sqlx::query(
            r#"
            SELECT bytes_done, total_bytes
            FROM transfer_state
            WHERE artifact_id = ?1
            "#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let done: i64 = row.get("bytes_done");
            let total: i64 = row.get("total_bytes");
            TransferState::new(done.max(0) as u64, total.max(0) as u64)
        }))
    }

    /// Insert or replace the offset for `artifact_id`.
    pub async fn save_transfer(&self, artifact_id: &str, state: &TransferState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_state (artifact_id, bytes_done, total_bytes, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(artifact_id) DO UPDATE SET
                bytes_done = excluded.bytes_done,
                total_bytes = excluded.total_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(artifact_id)
        .bind(state.bytes_done() as i64)
        .bind(state.total_bytes() as i64)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_transfer(&self, artifact_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM transfer_state WHERE artifact_id = ?1")
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All stored offsets, for `otadl status`.
    pub async fn list_transfers(&self) -> Result<Vec<(String, TransferState)>> {
        let rows = sqlx::query(
            r#"
            SELECT artifact_id, bytes_done, total_bytes
            FROM transfer_state
            ORDER BY updated_at DESC, artifact_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("artifact_id");
            let done: i64 = row.get("bytes_done");
            let total: i64 = row.get("total_bytes");
            out.push((id, TransferState::new(done.max(0) as u64, total.max(0) as u64)));
        }
        Ok(out)
    }
}
