use std::sync::Arc;

use exam_core::RetryPolicy;
use exam_core::envelope::SyncEnvelope;
use exam_core::model::EvaluationType;
use storage::repository::SnapshotRepository;

use crate::api::{AttemptApi, AttemptTarget};
use crate::notify::{Notice, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// One final submission as handed to [`SubmitService::submit`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub target: AttemptTarget,
    pub envelope: SyncEnvelope,
    pub evaluation: EvaluationType,
    pub file_ref: Option<String>,
}

/// Final submission with bounded retry.
#[derive(Clone)]
pub struct SubmitService {
    api: Arc<dyn AttemptApi>,
    snapshots: Arc<dyn SnapshotRepository>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl SubmitService {
    #[must_use]
    pub fn new(
        api: Arc<dyn AttemptApi>,
        snapshots: Arc<dyn SnapshotRepository>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            snapshots,
            notifier,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Post the final state until it is accepted or the retry budget runs
    /// out. `on_attempt` is called with the attempt number before each post.
    ///
    /// On success the local snapshot is removed. On exhaustion it is left in
    /// place so the answers survive.
    pub async fn submit<F>(&self, request: &SubmitRequest, mut on_attempt: F) -> SubmitOutcome
    where
        F: FnMut(u32) + Send,
    {
        let attempt_id = &request.target.attempt_id;
        let mut attempt = 1;
        loop {
            on_attempt(attempt);
            let result = self
                .api
                .submit(
                    &request.target,
                    &request.envelope,
                    request.evaluation,
                    request.file_ref.as_deref(),
                )
                .await;

            match result {
                Ok(()) => {
                    log::info!("attempt {attempt_id} submitted on try {attempt}");
                    if let Err(err) = self.snapshots.remove_snapshot(attempt_id).await {
                        log::warn!("could not clear local state for {attempt_id}: {err}");
                    }
                    self.notifier.notify(Notice::Submitted);
                    return SubmitOutcome::Submitted { attempts: attempt };
                }
                Err(err) => {
                    log::warn!("submit try {attempt} for {attempt_id} failed: {err}");
                    let Some(delay) = self.policy.delay_after(attempt) else {
                        log::error!("giving up on submitting {attempt_id} after {attempt} tries");
                        self.notifier.notify(Notice::SubmitFailed { attempts: attempt });
                        return SubmitOutcome::Exhausted { attempts: attempt };
                    };
                    attempt += 1;
                    self.notifier
                        .notify(Notice::SubmitRetrying { attempt, delay });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
