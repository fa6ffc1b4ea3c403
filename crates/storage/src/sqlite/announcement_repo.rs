use chrono::{DateTime, Utc};
use exam_core::model::{Announcement, AttemptId};
use sqlx::Row;

use super::{SqliteRepository, conn, ser};
use crate::repository::{AnnouncementRepository, StorageError};

#[async_trait::async_trait]
impl AnnouncementRepository for SqliteRepository {
    async fn replace_announcements(
        &self,
        attempt: &AttemptId,
        announcements: &[Announcement],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        sqlx::query("DELETE FROM announcements WHERE attempt_id = ?1")
            .bind(attempt.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        for announcement in announcements {
            let payload = serde_json::to_string(&announcement.payload).map_err(ser)?;
            sqlx::query(
                r"
                    INSERT INTO announcements (attempt_id, payload, received_at)
                    VALUES (?1, ?2, ?3)
                ",
            )
            .bind(attempt.as_str())
            .bind(payload)
            .bind(announcement.received_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn list_announcements(
        &self,
        attempt: &AttemptId,
    ) -> Result<Vec<Announcement>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT payload, received_at
                FROM announcements
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
                let payload: String = row.try_get("payload").map_err(ser)?;
                let received_at: DateTime<Utc> = row.try_get("received_at").map_err(ser)?;
                let payload = serde_json::from_str(&payload).map_err(ser)?;
                Ok(Announcement::new(payload, received_at))
            })
            .collect()
    }
}
