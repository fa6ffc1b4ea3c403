//! One learner's attempt: navigation, answers, timers, proctoring and the
//! submission state machine, all in memory and free of I/O.
//!
//! The caller drives the session with one [`AttemptSession::tick`] per second
//! and reacts to the returned [`SessionEvent`]s (sync, persist, submit).

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::envelope::{AttemptStatus, EnvelopeSource, SyncEnvelope};
use crate::model::{Assessment, AttemptId, Position, Question, QuestionId};
use crate::proctor::{
    ChallengeEvent, ChallengeMonitor, ChallengeResponse, Escalation, ProctorError,
    TabSwitchMonitor, VerificationChallenge, concentration_score, DEFAULT_TAB_SWITCH_THRESHOLD,
};
use crate::timer::{TimerEngine, TimerError};
use crate::tracker::{AnswerTracker, TrackerCounts, TrackerError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("attempt is no longer active")]
    NotActive,

    #[error("unknown question: {0}")]
    UnknownQuestion(QuestionId),

    #[error("switching sections is not allowed in this assessment")]
    SectionLocked,

    #[error("already at the last question")]
    AtEnd,

    #[error("already at the first question")]
    AtStart,

    #[error("no submission is in progress")]
    NotSubmitting,

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Proctor(#[from] ProctorError),
}

//
// ─── CONFIG & STATE ────────────────────────────────────────────────────────────
//

/// Cadences and thresholds for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub sync_every_secs: u32,
    pub persist_every_secs: u32,
    pub tab_switch_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_every_secs: 60,
            persist_every_secs: 5,
            tab_switch_threshold: DEFAULT_TAB_SWITCH_THRESHOLD,
        }
    }
}

/// Submission lifecycle.
///
/// `Active → Submitting → Closed`, with failed attempts looping through
/// `Submitting { attempt + 1 }` until the retry budget is spent, which lands
/// in `SubmitFailed`. A learner may start over from `SubmitFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Active,
    Submitting { attempt: u32 },
    Closed,
    SubmitFailed { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitReason {
    Manual,
    TimeUp,
    TimeExhausted,
    TabSwitchLimit,
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SubmitReason::Manual => "submitted by learner",
            SubmitReason::TimeUp => "test time is over",
            SubmitReason::TimeExhausted => "no question has time left",
            SubmitReason::TabSwitchLimit => "too many tab switches",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Advanced { from: Position, to: Position },
    ChallengeIssued(VerificationChallenge),
    ChallengeMissed,
    ForceSubmit(SubmitReason),
    SyncDue,
    PersistDue,
}

/// Everything needed to resume an attempt after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub attempt_id: AttemptId,
    pub assessment: Assessment,
    pub timer: TimerEngine,
    pub tracker: AnswerTracker,
    pub tab_switches: TabSwitchMonitor,
    pub challenges: ChallengeMonitor,
    pub submission: SubmissionState,
    pub ticks: u64,
    pub saved_at: DateTime<Utc>,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

pub struct AttemptSession {
    attempt_id: AttemptId,
    assessment: Assessment,
    timer: TimerEngine,
    tracker: AnswerTracker,
    tab_switches: TabSwitchMonitor,
    challenges: ChallengeMonitor,
    submission: SubmissionState,
    config: SessionConfig,
    ticks: u64,
}

impl AttemptSession {
    /// Start a fresh attempt positioned on the first question.
    #[must_use]
    pub fn new(attempt_id: AttemptId, assessment: Assessment, config: SessionConfig) -> Self {
        let timer = TimerEngine::new(&assessment);
        let mut session = Self {
            attempt_id,
            timer,
            tracker: AnswerTracker::new(),
            tab_switches: TabSwitchMonitor::new(config.tab_switch_threshold),
            challenges: ChallengeMonitor::new(),
            submission: SubmissionState::Active,
            config,
            ticks: 0,
            assessment,
        };
        session.visit_current();
        session
    }

    /// Resume from a persisted snapshot. Configuration comes from `config`,
    /// not from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Timer` if the timer state does not fit the
    /// snapshot's assessment.
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let timer = TimerEngine::from_state(
            &snapshot.assessment,
            snapshot.timer.state().clone(),
            snapshot.timer.current(),
        )?;
        Ok(Self {
            attempt_id: snapshot.attempt_id,
            assessment: snapshot.assessment,
            timer,
            tracker: snapshot.tracker,
            tab_switches: snapshot
                .tab_switches
                .with_threshold(config.tab_switch_threshold),
            challenges: snapshot.challenges,
            submission: snapshot.submission,
            config,
            ticks: snapshot.ticks,
        })
    }

    #[must_use]
    pub fn snapshot(&self, saved_at: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            attempt_id: self.attempt_id.clone(),
            assessment: self.assessment.clone(),
            timer: self.timer.clone(),
            tracker: self.tracker.clone(),
            tab_switches: self.tab_switches.clone(),
            challenges: self.challenges.clone(),
            submission: self.submission,
            ticks: self.ticks,
            saved_at,
        }
    }

    #[must_use]
    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    #[must_use]
    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    #[must_use]
    pub fn timer(&self) -> &TimerEngine {
        &self.timer
    }

    #[must_use]
    pub fn tracker(&self) -> &AnswerTracker {
        &self.tracker
    }

    #[must_use]
    pub fn challenges(&self) -> &ChallengeMonitor {
        &self.challenges
    }

    #[must_use]
    pub fn submission(&self) -> SubmissionState {
        self.submission
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.submission == SubmissionState::Active
    }

    /// A submission was in flight when the snapshot was taken.
    #[must_use]
    pub fn needs_submit(&self) -> bool {
        matches!(self.submission, SubmissionState::Submitting { .. })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.submission == SubmissionState::Closed
    }

    #[must_use]
    pub fn tab_switch_count(&self) -> u32 {
        self.tab_switches.count()
    }

    #[must_use]
    pub fn concentration_score(&self) -> u32 {
        concentration_score(
            self.tab_switches.count(),
            self.challenges.missed(),
            self.challenges.wrong(),
        )
    }

    #[must_use]
    pub fn counts(&self) -> TrackerCounts {
        self.tracker.counts()
    }

    #[must_use]
    pub fn current_position(&self) -> Position {
        self.timer.current()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.assessment.question_at(self.timer.current())
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Jump to a question by id.
    ///
    /// # Errors
    ///
    /// Fails when the attempt is not active, the question is unknown, it lies
    /// in another section while switching is disallowed, or its time is up.
    pub fn go_to(&mut self, question: &QuestionId) -> Result<Position, SessionError> {
        self.ensure_active()?;
        let target = self
            .assessment
            .position_of(question)
            .ok_or_else(|| SessionError::UnknownQuestion(question.clone()))?;
        if target.section != self.current_position().section
            && !self.assessment.can_switch_section()
        {
            return Err(SessionError::SectionLocked);
        }
        self.move_to(target)
    }

    /// Move to the first question of another section.
    ///
    /// # Errors
    ///
    /// Same conditions as [`AttemptSession::go_to`].
    pub fn go_to_section(&mut self, section: usize) -> Result<Position, SessionError> {
        self.ensure_active()?;
        if section != self.current_position().section && !self.assessment.can_switch_section() {
            return Err(SessionError::SectionLocked);
        }
        self.timer.set_current_section(&self.assessment, section)?;
        self.visit_current();
        Ok(self.current_position())
    }

    /// Move to the next question that still has time, crossing into the
    /// following section when the current one is finished.
    ///
    /// # Errors
    ///
    /// Returns `AtEnd` when no later question can be entered.
    pub fn next(&mut self) -> Result<Position, SessionError> {
        self.ensure_active()?;
        let mut cursor = self.assessment.next_position(self.current_position());
        while let Some(pos) = cursor {
            if self.timer.can_enter(&self.assessment, pos) {
                return self.move_to(pos);
            }
            cursor = self.assessment.next_position(pos);
        }
        Err(SessionError::AtEnd)
    }

    /// Move to the previous question that still has time.
    ///
    /// # Errors
    ///
    /// Returns `AtStart` when there is none, or `SectionLocked` when it lies in
    /// an earlier section and switching is disallowed.
    pub fn previous(&mut self) -> Result<Position, SessionError> {
        self.ensure_active()?;
        let from = self.current_position();
        let mut cursor = self.assessment.previous_position(from);
        while let Some(pos) = cursor {
            if pos.section != from.section && !self.assessment.can_switch_section() {
                return Err(SessionError::SectionLocked);
            }
            if self.timer.can_enter(&self.assessment, pos) {
                return self.move_to(pos);
            }
            cursor = self.assessment.previous_position(pos);
        }
        Err(SessionError::AtStart)
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Overwrite the answer for `question`.
    ///
    /// # Errors
    ///
    /// Fails when the attempt is not active, the question is unknown, its time
    /// is up, or the tracker rejects the values.
    pub fn set_answer(
        &mut self,
        question: &QuestionId,
        values: Vec<String>,
    ) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.ensure_answerable(question)?;
        let q = self
            .assessment
            .question(question)
            .ok_or_else(|| SessionError::UnknownQuestion(question.clone()))?;
        self.tracker.set_answer(q, values)?;
        Ok(())
    }

    /// Toggle the review flag and return its new value.
    ///
    /// # Errors
    ///
    /// Fails when the attempt is not active or the question is unknown.
    pub fn mark_for_review(&mut self, question: &QuestionId) -> Result<bool, SessionError> {
        self.ensure_active()?;
        self.ensure_known(question)?;
        Ok(self.tracker.mark_for_review(question))
    }

    /// # Errors
    ///
    /// Fails when the attempt is not active, the question is unknown, or its
    /// time is up.
    pub fn clear_response(&mut self, question: &QuestionId) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.ensure_answerable(question)?;
        self.tracker.clear_response(question);
        Ok(())
    }

    //
    // ─── PROCTORING ────────────────────────────────────────────────────────────
    //

    /// Record that the page was hidden. Returns the forced submission when
    /// this switch crosses the threshold.
    pub fn page_hidden(&mut self) -> Option<SessionEvent> {
        if !self.is_active() {
            return None;
        }
        match self.tab_switches.page_hidden(self.assessment.evaluation()) {
            Escalation::ForceSubmit => self.force_submit(SubmitReason::TabSwitchLimit),
            Escalation::None => None,
        }
    }

    /// Answer the pending verification challenge.
    ///
    /// # Errors
    ///
    /// Propagates `ProctorError` when no challenge is pending or the index is
    /// out of range.
    pub fn respond_to_challenge(&mut self, choice: usize) -> Result<ChallengeResponse, SessionError> {
        Ok(self.challenges.respond(choice)?)
    }

    pub fn resume_media(&mut self) {
        self.challenges.resume_media();
    }

    //
    // ─── CLOCK ─────────────────────────────────────────────────────────────────
    //

    /// Advance the attempt by one second.
    ///
    /// Inactive sessions do not tick and return no events.
    pub fn tick<R: Rng>(&mut self, rng: &mut R) -> Vec<SessionEvent> {
        if !self.is_active() {
            return Vec::new();
        }
        self.ticks += 1;
        let mut events = Vec::new();

        let report = self.timer.tick(&self.assessment);
        if let Some((from, to)) = report.advanced {
            self.visit_current();
            events.push(SessionEvent::Advanced { from, to });
        }

        match self.challenges.tick(rng) {
            Some(ChallengeEvent::Issued(challenge)) => {
                events.push(SessionEvent::ChallengeIssued(challenge));
            }
            Some(ChallengeEvent::Missed) => events.push(SessionEvent::ChallengeMissed),
            None => {}
        }

        let forced = if report.test_expired {
            self.force_submit(SubmitReason::TimeUp)
        } else if report.exhausted {
            self.force_submit(SubmitReason::TimeExhausted)
        } else {
            None
        };

        if let Some(event) = forced {
            events.push(event);
            events.push(SessionEvent::PersistDue);
            return events;
        }

        if self.is_due(self.config.sync_every_secs) {
            events.push(SessionEvent::SyncDue);
        }
        if self.is_due(self.config.persist_every_secs) {
            events.push(SessionEvent::PersistDue);
        }
        events
    }

    #[must_use]
    pub fn envelope(&self, status: AttemptStatus, client_millis: i64) -> SyncEnvelope {
        SyncEnvelope::build(
            &EnvelopeSource {
                attempt_id: &self.attempt_id,
                assessment: &self.assessment,
                timers: self.timer.state(),
                tracker: &self.tracker,
                tab_switch_count: self.tab_switches.count(),
            },
            status,
            client_millis,
        )
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    /// Enter `Submitting` from `Active`, or from `SubmitFailed` for a manual
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns `NotActive` when a submission is already running or done.
    pub fn begin_submit(&mut self) -> Result<(), SessionError> {
        match self.submission {
            SubmissionState::Active | SubmissionState::SubmitFailed { .. } => {
                self.submission = SubmissionState::Submitting { attempt: 1 };
                Ok(())
            }
            SubmissionState::Submitting { .. } | SubmissionState::Closed => {
                Err(SessionError::NotActive)
            }
        }
    }

    /// Note that attempt number `attempt` is starting.
    ///
    /// # Errors
    ///
    /// Returns `NotSubmitting` outside of `Submitting`.
    pub fn record_submit_attempt(&mut self, attempt: u32) -> Result<(), SessionError> {
        self.ensure_submitting()?;
        self.submission = SubmissionState::Submitting { attempt };
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotSubmitting` outside of `Submitting`.
    pub fn submit_succeeded(&mut self) -> Result<(), SessionError> {
        self.ensure_submitting()?;
        self.submission = SubmissionState::Closed;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotSubmitting` outside of `Submitting`.
    pub fn submit_exhausted(&mut self, attempts: u32) -> Result<(), SessionError> {
        self.ensure_submitting()?;
        self.submission = SubmissionState::SubmitFailed { attempts };
        Ok(())
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    fn force_submit(&mut self, reason: SubmitReason) -> Option<SessionEvent> {
        self.begin_submit()
            .ok()
            .map(|()| SessionEvent::ForceSubmit(reason))
    }

    fn is_due(&self, every: u32) -> bool {
        every > 0 && self.ticks % u64::from(every) == 0
    }

    fn move_to(&mut self, pos: Position) -> Result<Position, SessionError> {
        self.timer.set_current_question(&self.assessment, pos)?;
        self.visit_current();
        Ok(pos)
    }

    fn visit_current(&mut self) {
        if let Some(question) = self.assessment.question_at(self.timer.current()) {
            let id = question.id.clone();
            self.tracker.visit(&id);
        }
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SessionError::NotActive)
        }
    }

    fn ensure_submitting(&self) -> Result<(), SessionError> {
        if self.needs_submit() {
            Ok(())
        } else {
            Err(SessionError::NotSubmitting)
        }
    }

    fn ensure_answerable(&self, question: &QuestionId) -> Result<(), SessionError> {
        let pos = self
            .assessment
            .position_of(question)
            .ok_or_else(|| SessionError::UnknownQuestion(question.clone()))?;
        self.timer.ensure_open(&self.assessment, pos)?;
        Ok(())
    }

    fn ensure_known(&self, question: &QuestionId) -> Result<(), SessionError> {
        self.assessment
            .position_of(question)
            .map(|_| ())
            .ok_or_else(|| SessionError::UnknownQuestion(question.clone()))
    }
}

impl fmt::Debug for AttemptSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptSession")
            .field("attempt_id", &self.attempt_id)
            .field("assessment_id", self.assessment.id())
            .field("current", &self.timer.current())
            .field("test_remaining", &self.timer.test_remaining())
            .field("submission", &self.submission)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{per_question, per_section};
    use crate::model::{AssessmentId, DistributionDuration, EvaluationType};
    use crate::time::fixed_now;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn session(assessment: Assessment) -> AttemptSession {
        AttemptSession::new(AttemptId::new("t1"), assessment, SessionConfig::default())
    }

    fn qid(id: &str) -> QuestionId {
        QuestionId::new(id)
    }

    fn run(session: &mut AttemptSession, ticks: usize) -> Vec<SessionEvent> {
        let mut rng = StdRng::seed_from_u64(3);
        (0..ticks).flat_map(|_| session.tick(&mut rng)).collect()
    }

    #[test]
    fn thirty_idle_ticks_advance_to_second_question() {
        let mut s = session(per_question());
        let events = run(&mut s, 30);

        assert!(events.contains(&SessionEvent::Advanced {
            from: Position::new(0, 0),
            to: Position::new(0, 1),
        }));
        assert_eq!(s.current_question().unwrap().id, qid("q2"));
        let q1 = s.tracker().state(&qid("q1"));
        assert!(q1.visited);
        assert!(!q1.answered);
        assert!(s.tracker().state(&qid("q2")).visited);
    }

    #[test]
    fn test_expiry_forces_exactly_one_submission() {
        let assessment = Assessment::new(
            AssessmentId::new("short"),
            "Short",
            10,
            vec![crate::model::fixtures::section(
                "s1",
                Some(100),
                vec![crate::model::fixtures::choice("q1", 1, None)],
            )],
            false,
            DistributionDuration::PerSection,
            EvaluationType::Auto,
        )
        .unwrap();
        let mut s = session(assessment);
        let events = run(&mut s, 50);
        let forced: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::ForceSubmit(_)))
            .collect();
        assert_eq!(forced, vec![&SessionEvent::ForceSubmit(SubmitReason::TimeUp)]);
        assert_eq!(s.submission(), SubmissionState::Submitting { attempt: 1 });
        assert_eq!(s.timer().test_remaining(), 0);
    }

    #[test]
    fn third_tab_switch_forces_single_submission() {
        let mut s = session(per_question());
        let forced: Vec<_> = (0..5).filter_map(|_| s.page_hidden()).collect();
        assert_eq!(
            forced,
            vec![SessionEvent::ForceSubmit(SubmitReason::TabSwitchLimit)]
        );
        assert_eq!(s.tab_switch_count(), 3);
        assert!(matches!(s.set_answer(&qid("q1"), vec![]), Err(SessionError::NotActive)));
    }

    #[test]
    fn sync_and_persist_cadence() {
        let mut s = session(per_section(true));
        let events = run(&mut s, 60);
        let syncs = events.iter().filter(|e| **e == SessionEvent::SyncDue).count();
        let persists = events.iter().filter(|e| **e == SessionEvent::PersistDue).count();
        assert_eq!(syncs, 1);
        assert_eq!(persists, 12);
    }

    #[test]
    fn section_lock_blocks_jumps_but_not_next() {
        let mut s = session(per_section(false));
        assert_eq!(s.go_to(&qid("q3")), Err(SessionError::SectionLocked));
        assert_eq!(s.next().unwrap(), Position::new(0, 1));
        assert_eq!(s.next().unwrap(), Position::new(1, 0));
        assert_eq!(s.previous(), Err(SessionError::SectionLocked));
    }

    #[test]
    fn free_navigation_visits_questions() {
        let mut s = session(per_section(true));
        s.go_to(&qid("q4")).unwrap();
        assert_eq!(s.next(), Err(SessionError::AtEnd));
        s.previous().unwrap();
        assert!(s.tracker().state(&qid("q3")).visited);
        assert!(!s.tracker().state(&qid("q2")).visited);
        assert_eq!(s.counts().visited_unanswered, 3);
    }

    #[test]
    fn expired_questions_are_skipped() {
        let mut s = session(per_question());
        run(&mut s, 30);
        assert_eq!(s.go_to(&qid("q1")), Err(SessionError::Timer(TimerError::QuestionExpired)));
        assert_eq!(s.previous(), Err(SessionError::AtStart));
    }

    fn per_question_locked() -> Assessment {
        use crate::model::fixtures::{choice, section};
        Assessment::new(
            AssessmentId::new("locked"),
            "Locked",
            600,
            vec![
                section("s1", None, vec![choice("q1", 1, Some(30)), choice("q2", 2, Some(30))]),
                section("s2", None, vec![choice("q3", 3, Some(30)), choice("q4", 4, Some(30))]),
            ],
            false,
            DistributionDuration::PerQuestion,
            EvaluationType::Auto,
        )
        .unwrap()
    }

    #[test]
    fn expired_question_stops_counting_and_rejects_answers() {
        let mut s = session(per_question());
        s.go_to(&qid("q4")).unwrap();
        s.set_answer(&qid("q4"), vec!["optA".into()]).unwrap();
        let events = run(&mut s, 45);

        // Nothing left ahead, so the learner lands on the earliest open question.
        assert!(events.contains(&SessionEvent::Advanced {
            from: Position::new(1, 1),
            to: Position::new(0, 0),
        }));
        let q4 = s.timer().state().question(Position::new(1, 1)).unwrap();
        assert_eq!(q4.remaining(), Some(0));
        assert_eq!(q4.elapsed(), 30);
        assert_eq!(
            s.set_answer(&qid("q4"), vec!["optB".into()]),
            Err(SessionError::Timer(TimerError::QuestionExpired))
        );
        assert_eq!(
            s.clear_response(&qid("q4")),
            Err(SessionError::Timer(TimerError::QuestionExpired))
        );
        assert_eq!(s.tracker().answer(&qid("q4")), ["optA".to_string()]);
        s.set_answer(&qid("q1"), vec!["optB".into()]).unwrap();

        let envelope = s.envelope(AttemptStatus::Live, 0);
        assert_eq!(envelope.sections[1].questions[1].time_taken_in_seconds, 30);
    }

    #[test]
    fn locked_sections_are_not_revisited_when_time_runs_out() {
        let mut s = session(per_question_locked());
        s.next().unwrap();
        s.next().unwrap();
        s.next().unwrap();
        assert_eq!(s.current_position(), Position::new(1, 1));

        let events = run(&mut s, 30);
        assert!(events.contains(&SessionEvent::Advanced {
            from: Position::new(1, 1),
            to: Position::new(1, 0),
        }));

        let events = run(&mut s, 30);
        assert!(events.contains(&SessionEvent::ForceSubmit(SubmitReason::TimeExhausted)));
        assert_eq!(s.current_position(), Position::new(1, 0));
    }

    #[test]
    fn restored_attempt_uses_configured_threshold() {
        let mut s = session(per_question());
        s.page_hidden();
        let config = SessionConfig {
            tab_switch_threshold: 2,
            ..SessionConfig::default()
        };
        let mut resumed = AttemptSession::from_snapshot(s.snapshot(fixed_now()), config).unwrap();
        assert_eq!(
            resumed.page_hidden(),
            Some(SessionEvent::ForceSubmit(SubmitReason::TabSwitchLimit))
        );
        assert_eq!(resumed.tab_switch_count(), 2);
    }

    #[test]
    fn answers_through_session() {
        let mut s = session(per_question());
        s.set_answer(&qid("q1"), vec!["optA".into()]).unwrap();
        s.set_answer(&qid("q1"), vec!["optB".into()]).unwrap();
        assert_eq!(s.tracker().answer(&qid("q1")), ["optB".to_string()]);
        assert!(s.mark_for_review(&qid("q1")).unwrap());
        assert!(s.tracker().state(&qid("q1")).answered);
        s.clear_response(&qid("q1")).unwrap();
        assert!(!s.tracker().state(&qid("q1")).answered);
        assert!(matches!(
            s.set_answer(&qid("nope"), vec![]),
            Err(SessionError::UnknownQuestion(_))
        ));
    }

    #[test]
    fn submission_state_machine() {
        let mut s = session(per_question());
        assert_eq!(s.submit_succeeded(), Err(SessionError::NotSubmitting));
        s.begin_submit().unwrap();
        assert_eq!(s.begin_submit(), Err(SessionError::NotActive));
        s.record_submit_attempt(2).unwrap();
        s.submit_exhausted(5).unwrap();
        assert_eq!(s.submission(), SubmissionState::SubmitFailed { attempts: 5 });
        assert!(s.tick(&mut StdRng::seed_from_u64(0)).is_empty());

        s.begin_submit().unwrap();
        s.submit_succeeded().unwrap();
        assert!(s.is_closed());
    }

    #[test]
    fn snapshot_round_trip_resumes_state() {
        let mut s = session(per_question());
        s.set_answer(&qid("q1"), vec!["optA".into()]).unwrap();
        s.page_hidden();
        run(&mut s, 12);

        let snap = s.snapshot(fixed_now());
        let json = serde_json::to_string(&snap).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let resumed = AttemptSession::from_snapshot(restored, SessionConfig::default()).unwrap();

        assert_eq!(resumed.tab_switch_count(), 1);
        assert_eq!(resumed.timer().test_elapsed(), 12);
        assert_eq!(resumed.tracker().answer(&qid("q1")), ["optA".to_string()]);
        assert_eq!(resumed.current_position(), s.current_position());
    }

    #[test]
    fn wrong_challenge_lowers_score() {
        let mut s = session(per_question());
        assert_eq!(s.concentration_score(), 100);
        assert!(matches!(
            s.respond_to_challenge(0),
            Err(SessionError::Proctor(ProctorError::NoChallenge))
        ));
        s.page_hidden();
        assert_eq!(s.concentration_score(), 90);
    }

    #[test]
    fn envelope_reflects_status() {
        let s = session(per_question());
        let env = s.envelope(AttemptStatus::Ended, 42);
        assert_eq!(env.assessment.status, AttemptStatus::Ended);
        assert_eq!(env.client_last_sync, 42);
        assert!(env.sections[0].questions[0].is_visited);
    }
}
