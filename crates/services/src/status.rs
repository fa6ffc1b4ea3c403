use exam_core::model::{Position, QuestionId};
use exam_core::tracker::TrackerCounts;
use exam_core::{AttemptSession, SubmissionState};

/// Read-only summary of an attempt for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub position: Position,
    pub question: Option<QuestionId>,
    pub question_remaining: Option<u32>,
    pub section_remaining: Option<u32>,
    pub test_remaining: u32,
    pub counts: TrackerCounts,
    pub tab_switches: u32,
    pub concentration_score: u32,
    pub challenge: Option<[u32; 3]>,
    pub media_paused: bool,
    pub submission: SubmissionState,
}

impl SessionStatus {
    #[must_use]
    pub fn from_session(session: &AttemptSession) -> Self {
        let position = session.current_position();
        let timers = session.timer().state();
        Self {
            position,
            question: session.current_question().map(|q| q.id.clone()),
            question_remaining: timers.question(position).and_then(|c| c.remaining()),
            section_remaining: timers.section(position.section).and_then(|c| c.remaining()),
            test_remaining: session.timer().test_remaining(),
            counts: session.counts(),
            tab_switches: session.tab_switch_count(),
            concentration_score: session.concentration_score(),
            challenge: session.challenges().pending().map(|c| c.numbers()),
            media_paused: session.challenges().is_media_paused(),
            submission: session.submission(),
        }
    }
}
