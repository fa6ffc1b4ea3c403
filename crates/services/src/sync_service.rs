use std::sync::Arc;

use chrono::{DateTime, Utc};

use exam_core::Clock;
use exam_core::envelope::SyncEnvelope;
use exam_core::model::Announcement;
use storage::repository::AnnouncementRepository;

use crate::api::{AttemptApi, AttemptTarget};
use crate::error::AttemptError;
use crate::notify::{Notice, Notifier};

/// Posts periodic progress and keeps any announcements the server returns.
#[derive(Clone)]
pub struct SyncService {
    api: Arc<dyn AttemptApi>,
    announcements: Arc<dyn AnnouncementRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
}

impl SyncService {
    #[must_use]
    pub fn new(
        api: Arc<dyn AttemptApi>,
        announcements: Arc<dyn AnnouncementRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Clock,
    ) -> Self {
        Self {
            api,
            announcements,
            notifier,
            clock,
        }
    }

    /// Post `envelope` and store the announcements in the response.
    /// Returns how many announcements were not seen before.
    ///
    /// A failed post raises [`Notice::SyncFailed`]; the attempt carries on
    /// and the next sync sends the full state again.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Api` when the post fails and
    /// `AttemptError::Storage` when announcements cannot be saved.
    pub async fn sync(
        &self,
        target: &AttemptTarget,
        envelope: &SyncEnvelope,
    ) -> Result<usize, AttemptError> {
        let response = match self.api.sync(target, envelope).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("sync failed for attempt {}: {err}", target.attempt_id);
                self.notifier.notify(Notice::SyncFailed);
                return Err(err.into());
            }
        };

        let payload = match response.announcements {
            None | Some(serde_json::Value::Null) => return Ok(0),
            Some(payload) => payload,
        };
        let stored = self
            .announcements
            .list_announcements(&target.attempt_id)
            .await?;
        let (current, fresh) = merge_announcements(&stored, payload, self.clock.now());
        if current == stored {
            return Ok(0);
        }
        self.announcements
            .replace_announcements(&target.attempt_id, &current)
            .await?;
        log::debug!(
            "stored {} announcement(s) for attempt {}, {fresh} new",
            current.len(),
            target.attempt_id
        );
        if fresh > 0 {
            self.notifier.notify(Notice::Announcements { count: fresh });
        }
        Ok(fresh)
    }
}

/// The server always sends its full list. Entries already stored keep their
/// original receive time; returns the merged list and how many are new.
fn merge_announcements(
    stored: &[Announcement],
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> (Vec<Announcement>, usize) {
    let mut fresh = 0;
    let current = Announcement::from_response(payload, now)
        .into_iter()
        .map(|incoming| {
            match stored.iter().find(|seen| seen.payload == incoming.payload) {
                Some(seen) => seen.clone(),
                None => {
                    fresh += 1;
                    incoming
                }
            }
        })
        .collect();
    (current, fresh)
}
