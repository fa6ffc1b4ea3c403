//! Resuming, persisting and driving a live attempt.

use std::sync::Arc;
use std::time::Duration;

use exam_core::envelope::AttemptStatus;
use exam_core::model::{Announcement, Assessment, AttemptId, QuestionId};
use exam_core::session::{SessionError, SubmitReason};
use exam_core::{AttemptSession, Clock, SessionConfig, SessionEvent};
use rand::SeedableRng;
use rand::rngs::StdRng;
use storage::repository::Storage;
use tokio::sync::{mpsc, oneshot};

use crate::api::AttemptTarget;
use crate::error::AttemptError;
use crate::notify::{Notice, Notifier};
use crate::status::SessionStatus;
use crate::submit_service::{SubmitOutcome, SubmitRequest, SubmitService};
use crate::sync_service::SyncService;

//
// ─── ATTEMPT SERVICE ───────────────────────────────────────────────────────────
//

/// Loads and saves attempts against local storage.
#[derive(Clone)]
pub struct AttemptService {
    storage: Storage,
    clock: Clock,
    config: SessionConfig,
}

impl AttemptService {
    #[must_use]
    pub fn new(storage: Storage, clock: Clock, config: SessionConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Resume the saved attempt `attempt_id`, or start a fresh one.
    ///
    /// A saved payload that cannot be decoded, or that belongs to another
    /// assessment, is quarantined and replaced by a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Storage` when storage is unreachable.
    pub async fn resume_or_start(
        &self,
        assessment: Assessment,
        attempt_id: AttemptId,
    ) -> Result<AttemptSession, AttemptError> {
        match self.storage.snapshots.load_snapshot(&attempt_id).await {
            Ok(Some(snapshot)) if snapshot.assessment.id() != assessment.id() => {
                self.quarantine(&attempt_id, "saved attempt belongs to another assessment")
                    .await?;
            }
            Ok(Some(snapshot)) => match AttemptSession::from_snapshot(snapshot, self.config) {
                Ok(session) => {
                    log::info!(
                        "resumed attempt {attempt_id} at {:?} ({:?})",
                        session.current_position(),
                        session.submission()
                    );
                    return Ok(session);
                }
                Err(err) => self.quarantine(&attempt_id, &err.to_string()).await?,
            },
            Ok(None) => {}
            Err(err) if err.is_corrupt() => self.quarantine(&attempt_id, &err.to_string()).await?,
            Err(err) => return Err(err.into()),
        }

        log::info!("starting attempt {attempt_id} for {}", assessment.id());
        let session = AttemptSession::new(attempt_id, assessment, self.config);
        self.persist(&session).await?;
        Ok(session)
    }

    /// Save the current state of `session`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Storage` if the snapshot cannot be written.
    pub async fn persist(&self, session: &AttemptSession) -> Result<(), AttemptError> {
        self.storage
            .snapshots
            .save_snapshot(&session.snapshot(self.clock.now()))
            .await?;
        Ok(())
    }

    /// Announcements received so far for `attempt_id`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Storage` on read failures.
    pub async fn announcements(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Vec<Announcement>, AttemptError> {
        Ok(self
            .storage
            .announcements
            .list_announcements(attempt_id)
            .await?)
    }

    async fn quarantine(&self, attempt_id: &AttemptId, reason: &str) -> Result<(), AttemptError> {
        log::warn!("discarding saved state for {attempt_id}: {reason}");
        self.storage.snapshots.quarantine_snapshot(attempt_id).await?;
        Ok(())
    }
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

/// Learner actions applied between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    GoTo(QuestionId),
    GoToSection(usize),
    Answer {
        question: QuestionId,
        values: Vec<String>,
    },
    Clear(QuestionId),
    ToggleReview(QuestionId),
    PageHidden,
    PickChallenge(usize),
    ResumeMedia,
    Submit {
        file_ref: Option<String>,
    },
    Status,
}

type Reply = Result<SessionStatus, SessionError>;

#[derive(Debug)]
pub struct CommandRequest {
    command: Command,
    reply: oneshot::Sender<Reply>,
}

/// Receiving end of [`command_channel`], consumed by [`AttemptLoop::run`].
#[derive(Debug)]
pub struct CommandInbox(mpsc::Receiver<CommandRequest>);

/// Sends commands to a running [`AttemptLoop`]. Dropping every handle ends
/// the loop once no submission is in flight.
#[derive(Clone, Debug)]
pub struct AttemptHandle {
    tx: mpsc::Sender<CommandRequest>,
}

impl AttemptHandle {
    /// Apply `command` and return the resulting status.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Domain` when the session rejects the command
    /// and `AttemptError::LoopClosed` when the loop has stopped.
    pub async fn send(&self, command: Command) -> Result<SessionStatus, AttemptError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| AttemptError::LoopClosed)?;
        Ok(rx.await.map_err(|_| AttemptError::LoopClosed)??)
    }
}

#[must_use]
pub fn command_channel(buffer: usize) -> (AttemptHandle, CommandInbox) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (AttemptHandle { tx }, CommandInbox(rx))
}

//
// ─── LOOP ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug)]
enum SubmitUpdate {
    Attempt(u32),
    Finished(SubmitOutcome),
}

/// Drives one attempt: a one-second tick, background sync and submission,
/// and learner commands in between.
pub struct AttemptLoop {
    session: AttemptSession,
    attempts: AttemptService,
    sync: SyncService,
    submit: SubmitService,
    notifier: Arc<dyn Notifier>,
    target: AttemptTarget,
    rng: StdRng,
    file_ref: Option<String>,
    submitting: bool,
}

impl AttemptLoop {
    #[must_use]
    pub fn new(
        session: AttemptSession,
        attempts: AttemptService,
        sync: SyncService,
        submit: SubmitService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let target = AttemptTarget::new(
            session.attempt_id().clone(),
            session.assessment().id().clone(),
        );
        Self {
            session,
            attempts,
            sync,
            submit,
            notifier,
            target,
            rng: StdRng::from_os_rng(),
            file_ref: None,
            submitting: false,
        }
    }

    /// File reference sent with a manually evaluated submission.
    #[must_use]
    pub fn with_file_ref(mut self, file_ref: impl Into<String>) -> Self {
        self.file_ref = Some(file_ref.into());
        self
    }

    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run until the attempt is closed, or until the inbox is closed and no
    /// submission is in flight. Returns the final session.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Storage` if the final state cannot be saved.
    pub async fn run(mut self, inbox: CommandInbox) -> Result<AttemptSession, AttemptError> {
        let CommandInbox(mut commands) = inbox;
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let mut inbox_open = true;

        if self.session.needs_submit() {
            log::info!("resuming interrupted submission for {}", self.target.attempt_id);
            self.start_submit(&updates_tx);
        } else if self.session.is_active() {
            self.spawn_sync();
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            if self.session.is_closed() || (!inbox_open && !self.submitting) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.on_tick(&updates_tx).await,
                request = commands.recv(), if inbox_open => match request {
                    Some(request) => self.on_command(request, &updates_tx).await,
                    None => inbox_open = false,
                },
                Some(update) = updates_rx.recv() => self.on_submit_update(update).await,
            }
        }

        if !self.session.is_closed() {
            self.attempts.persist(&self.session).await?;
        }
        Ok(self.session)
    }

    async fn on_tick(&mut self, updates: &mpsc::UnboundedSender<SubmitUpdate>) {
        for event in self.session.tick(&mut self.rng) {
            match event {
                SessionEvent::Advanced { from, to } => {
                    log::debug!("time up at {from:?}, moved to {to:?}");
                }
                SessionEvent::ChallengeIssued(challenge) => {
                    self.notifier.notify(Notice::ChallengeIssued {
                        numbers: challenge.numbers(),
                        target: challenge.target(),
                    });
                }
                SessionEvent::ChallengeMissed => self.notifier.notify(Notice::ChallengeMissed),
                SessionEvent::ForceSubmit(reason) => self.forced_submit(reason, updates).await,
                SessionEvent::SyncDue => self.spawn_sync(),
                SessionEvent::PersistDue => self.persist().await,
            }
        }
    }

    async fn on_command(
        &mut self,
        request: CommandRequest,
        updates: &mpsc::UnboundedSender<SubmitUpdate>,
    ) {
        let CommandRequest { command, reply } = request;
        let mutates = command != Command::Status;
        let result = self.apply(command, updates).await;
        if result.is_ok() && mutates {
            self.persist().await;
        }
        let reply_value = result.map(|()| SessionStatus::from_session(&self.session));
        if reply.send(reply_value).is_err() {
            log::debug!("command sender went away before the reply");
        }
    }

    async fn apply(
        &mut self,
        command: Command,
        updates: &mpsc::UnboundedSender<SubmitUpdate>,
    ) -> Result<(), SessionError> {
        let session = &mut self.session;
        match command {
            Command::Next => session.next().map(drop),
            Command::Previous => session.previous().map(drop),
            Command::GoTo(question) => session.go_to(&question).map(drop),
            Command::GoToSection(section) => session.go_to_section(section).map(drop),
            Command::Answer { question, values } => session.set_answer(&question, values),
            Command::Clear(question) => session.clear_response(&question),
            Command::ToggleReview(question) => session.mark_for_review(&question).map(drop),
            Command::PageHidden => {
                if let Some(SessionEvent::ForceSubmit(reason)) = session.page_hidden() {
                    self.forced_submit(reason, updates).await;
                }
                Ok(())
            }
            Command::PickChallenge(choice) => session.respond_to_challenge(choice).map(drop),
            Command::ResumeMedia => {
                session.resume_media();
                Ok(())
            }
            Command::Submit { file_ref } => {
                session.begin_submit()?;
                if file_ref.is_some() {
                    self.file_ref = file_ref;
                }
                log::info!(
                    "attempt {}: {}",
                    self.target.attempt_id,
                    SubmitReason::Manual
                );
                self.persist().await;
                self.start_submit(updates);
                Ok(())
            }
            Command::Status => Ok(()),
        }
    }

    async fn on_submit_update(&mut self, update: SubmitUpdate) {
        match update {
            SubmitUpdate::Attempt(attempt) => {
                if let Err(err) = self.session.record_submit_attempt(attempt) {
                    log::debug!("ignoring submit progress: {err}");
                }
            }
            SubmitUpdate::Finished(SubmitOutcome::Submitted { .. }) => {
                self.submitting = false;
                if let Err(err) = self.session.submit_succeeded() {
                    log::warn!("unexpected submit result: {err}");
                }
            }
            SubmitUpdate::Finished(SubmitOutcome::Exhausted { attempts }) => {
                self.submitting = false;
                if let Err(err) = self.session.submit_exhausted(attempts) {
                    log::warn!("unexpected submit result: {err}");
                }
                self.persist().await;
            }
        }
    }

    async fn forced_submit(
        &mut self,
        reason: SubmitReason,
        updates: &mpsc::UnboundedSender<SubmitUpdate>,
    ) {
        log::info!("attempt {}: {reason}", self.target.attempt_id);
        self.notifier.notify(Notice::ForcedSubmit(reason));
        self.persist().await;
        self.start_submit(updates);
    }

    fn start_submit(&mut self, updates: &mpsc::UnboundedSender<SubmitUpdate>) {
        if self.submitting {
            return;
        }
        self.submitting = true;

        let request = SubmitRequest {
            target: self.target.clone(),
            envelope: self
                .session
                .envelope(AttemptStatus::Ended, self.attempts.clock().now_millis()),
            evaluation: self.session.assessment().evaluation(),
            file_ref: self.file_ref.clone(),
        };
        let submit = self.submit.clone();
        let updates = updates.clone();
        tokio::spawn(async move {
            let progress = updates.clone();
            let outcome = submit
                .submit(&request, move |attempt| {
                    let _ = progress.send(SubmitUpdate::Attempt(attempt));
                })
                .await;
            if updates.send(SubmitUpdate::Finished(outcome)).is_err() {
                log::debug!("attempt loop stopped before submission finished");
            }
        });
    }

    fn spawn_sync(&self) {
        let envelope = self
            .session
            .envelope(AttemptStatus::Live, self.attempts.clock().now_millis());
        let sync = self.sync.clone();
        let target = self.target.clone();
        tokio::spawn(async move {
            if let Err(err) = sync.sync(&target, &envelope).await {
                log::debug!("sync skipped: {err}");
            }
        });
    }

    /// Snapshots are not rewritten while a submission is in flight; the
    /// submitter may already have cleared them.
    async fn persist(&self) {
        if self.submitting {
            return;
        }
        if let Err(err) = self.attempts.persist(&self.session).await {
            log::warn!("could not save attempt {}: {err}", self.target.attempt_id);
        }
    }
}
