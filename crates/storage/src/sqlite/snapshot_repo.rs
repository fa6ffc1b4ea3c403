use chrono::{DateTime, Utc};
use exam_core::SessionSnapshot;
use exam_core::model::AttemptId;
use sqlx::Row;

use super::{SqliteRepository, conn, ser};
use crate::repository::{
    QuarantinedSnapshot, SnapshotRepository, StorageError, decode_snapshot, encode_snapshot,
};

impl SqliteRepository {
    /// Payloads moved aside for `attempt`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on query or decoding failures.
    pub async fn list_quarantined(
        &self,
        attempt: &AttemptId,
    ) -> Result<Vec<QuarantinedSnapshot>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT attempt_id, payload, quarantined_at
                FROM quarantined_snapshots
                WHERE attempt_id = ?1
                ORDER BY id ASC
            ",
        )
        .bind(attempt.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| {
                let attempt_id: String = row.try_get("attempt_id").map_err(ser)?;
                let quarantined_at: DateTime<Utc> = row.try_get("quarantined_at").map_err(ser)?;
                Ok(QuarantinedSnapshot {
                    attempt_id: AttemptId::new(attempt_id),
                    payload: row.try_get("payload").map_err(ser)?,
                    quarantined_at,
                })
            })
            .collect()
    }

    /// Write a payload directly into the live slot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the write fails.
    pub async fn insert_raw_snapshot(
        &self,
        attempt: &AttemptId,
        raw: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO attempt_snapshots (attempt_id, payload, saved_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(attempt_id) DO UPDATE SET
                    payload = excluded.payload,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(attempt.as_str())
        .bind(raw)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotRepository for SqliteRepository {
    async fn load_snapshot(
        &self,
        attempt: &AttemptId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let row = sqlx::query("SELECT payload FROM attempt_snapshots WHERE attempt_id = ?1")
            .bind(attempt.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload").map_err(ser)?;
        decode_snapshot(&payload).map(Some)
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let payload = encode_snapshot(snapshot)?;
        sqlx::query(
            r"
                INSERT INTO attempt_snapshots (attempt_id, payload, saved_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(attempt_id) DO UPDATE SET
                    payload = excluded.payload,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(snapshot.attempt_id.as_str())
        .bind(payload)
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn remove_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM attempt_snapshots WHERE attempt_id = ?1")
            .bind(attempt.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn quarantine_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO quarantined_snapshots (attempt_id, payload, quarantined_at)
                SELECT attempt_id, payload, ?2
                FROM attempt_snapshots
                WHERE attempt_id = ?1
            ",
        )
        .bind(attempt.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let moved = sqlx::query("DELETE FROM attempt_snapshots WHERE attempt_id = ?1")
            .bind(attempt.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();

        tx.commit().await.map_err(conn)?;
        if moved > 0 {
            log::warn!("quarantined snapshot for attempt {attempt}");
        }
        Ok(())
    }
}
