//! Nested countdowns for a running attempt.
//!
//! Three layers count down once per [`TimerEngine::tick`]: the whole test,
//! the active section and the active question. Which layer forces navigation
//! depends on the assessment's [`DistributionDuration`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Assessment, DistributionDuration, Position};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimerError {
    #[error("no question at section {}, index {}", .0.section, .0.question)]
    OutOfRange(Position),

    #[error("time for this question has run out")]
    QuestionExpired,

    #[error("time for this section has run out")]
    SectionExpired,

    #[error("timer state does not match the assessment layout")]
    LayoutMismatch,
}

//
// ─── COUNTDOWN ─────────────────────────────────────────────────────────────────
//

/// One countdown. `remaining` is `None` for units without their own limit;
/// those still accumulate elapsed time but never expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    remaining: Option<u32>,
    elapsed: u32,
}

impl Countdown {
    #[must_use]
    pub fn new(limit_secs: Option<u32>) -> Self {
        Self {
            remaining: limit_secs,
            elapsed: 0,
        }
    }

    /// Advance one second. Returns `true` only on the tick that reaches zero.
    /// An expired countdown stays frozen, elapsed included.
    fn tick(&mut self) -> bool {
        match self.remaining.as_mut() {
            Some(0) => false,
            None => {
                self.elapsed = self.elapsed.saturating_add(1);
                false
            }
            Some(left) => {
                *left -= 1;
                self.elapsed = self.elapsed.saturating_add(1);
                *left == 0
            }
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Remaining seconds, reporting untimed units as zero.
    #[must_use]
    pub fn remaining_or_zero(&self) -> u32 {
        self.remaining.unwrap_or(0)
    }

    #[must_use]
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining == Some(0)
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Every countdown of an attempt, indexed like the assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub test: Countdown,
    pub sections: Vec<Countdown>,
    pub questions: Vec<Vec<Countdown>>,
}

impl TimerState {
    #[must_use]
    pub fn for_assessment(assessment: &Assessment) -> Self {
        let sections = assessment
            .sections()
            .iter()
            .map(|s| Countdown::new(s.duration_secs.filter(|d| *d > 0)))
            .collect();
        let questions = assessment
            .sections()
            .iter()
            .map(|s| {
                s.questions
                    .iter()
                    .map(|q| match assessment.distribution() {
                        DistributionDuration::PerQuestion => {
                            Countdown::new(q.duration_secs.filter(|d| *d > 0))
                        }
                        DistributionDuration::PerSection => Countdown::new(None),
                    })
                    .collect()
            })
            .collect();
        Self {
            test: Countdown::new(Some(assessment.duration_secs())),
            sections,
            questions,
        }
    }

    #[must_use]
    pub fn section(&self, idx: usize) -> Option<&Countdown> {
        self.sections.get(idx)
    }

    #[must_use]
    pub fn question(&self, pos: Position) -> Option<&Countdown> {
        self.questions.get(pos.section)?.get(pos.question)
    }

    fn matches(&self, assessment: &Assessment) -> bool {
        self.sections.len() == assessment.sections().len()
            && self
                .questions
                .iter()
                .zip(assessment.sections())
                .all(|(qs, s)| qs.len() == s.questions.len())
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// The whole-test timer reached zero on this tick.
    pub test_expired: bool,
    /// Set when the engine moved the active position.
    pub advanced: Option<(Position, Position)>,
    /// Every unit that can still be answered has run out of time.
    pub exhausted: bool,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEngine {
    state: TimerState,
    current: Position,
}

impl TimerEngine {
    #[must_use]
    pub fn new(assessment: &Assessment) -> Self {
        Self {
            state: TimerState::for_assessment(assessment),
            current: Position::START,
        }
    }

    /// Rebuild from persisted state.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::LayoutMismatch` if the state was captured for a
    /// differently shaped assessment.
    pub fn from_state(
        assessment: &Assessment,
        state: TimerState,
        current: Position,
    ) -> Result<Self, TimerError> {
        if !state.matches(assessment) || assessment.question_at(current).is_none() {
            return Err(TimerError::LayoutMismatch);
        }
        Ok(Self { state, current })
    }

    #[must_use]
    pub fn state(&self) -> &TimerState {
        &self.state
    }

    #[must_use]
    pub fn current(&self) -> Position {
        self.current
    }

    #[must_use]
    pub fn test_remaining(&self) -> u32 {
        self.state.test.remaining_or_zero()
    }

    #[must_use]
    pub fn test_elapsed(&self) -> u32 {
        self.state.test.elapsed()
    }

    /// Whether the learner may be placed on `pos` given the timers.
    #[must_use]
    pub fn can_enter(&self, assessment: &Assessment, pos: Position) -> bool {
        match assessment.distribution() {
            DistributionDuration::PerQuestion => self
                .state
                .question(pos)
                .is_some_and(|c| !c.is_expired()),
            DistributionDuration::PerSection => self
                .state
                .section(pos.section)
                .is_some_and(|c| !c.is_expired()),
        }
    }

    /// Check that `pos` exists and its authoritative timer has time left.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for unknown positions and `QuestionExpired` /
    /// `SectionExpired` when the authoritative timer for `pos` is at zero.
    pub fn ensure_open(&self, assessment: &Assessment, pos: Position) -> Result<(), TimerError> {
        if assessment.question_at(pos).is_none() {
            return Err(TimerError::OutOfRange(pos));
        }
        if !self.can_enter(assessment, pos) {
            return Err(match assessment.distribution() {
                DistributionDuration::PerQuestion => TimerError::QuestionExpired,
                DistributionDuration::PerSection => TimerError::SectionExpired,
            });
        }
        Ok(())
    }

    /// Make `pos` the active question (and its section the active section).
    ///
    /// # Errors
    ///
    /// Same as [`TimerEngine::ensure_open`].
    pub fn set_current_question(
        &mut self,
        assessment: &Assessment,
        pos: Position,
    ) -> Result<(), TimerError> {
        self.ensure_open(assessment, pos)?;
        self.current = pos;
        Ok(())
    }

    /// Make the first question of `section` active.
    ///
    /// # Errors
    ///
    /// Same as [`TimerEngine::set_current_question`].
    pub fn set_current_section(
        &mut self,
        assessment: &Assessment,
        section: usize,
    ) -> Result<(), TimerError> {
        let pos = assessment
            .first_of_section(section)
            .ok_or(TimerError::OutOfRange(Position::new(section, 0)))?;
        self.set_current_question(assessment, pos)
    }

    /// Advance every active countdown by one second and apply forced
    /// navigation for whichever layer is authoritative.
    pub fn tick(&mut self, assessment: &Assessment) -> TickReport {
        let mut report = TickReport {
            test_expired: self.state.test.tick(),
            ..TickReport::default()
        };

        let pos = self.current;
        let section_crossed = self
            .state
            .sections
            .get_mut(pos.section)
            .is_some_and(Countdown::tick);
        let question_crossed = self
            .state
            .questions
            .get_mut(pos.section)
            .and_then(|qs| qs.get_mut(pos.question))
            .is_some_and(Countdown::tick);

        let crossed = match assessment.distribution() {
            DistributionDuration::PerQuestion => question_crossed,
            DistributionDuration::PerSection => section_crossed,
        };
        if !crossed {
            return report;
        }

        let target = match assessment.distribution() {
            DistributionDuration::PerQuestion => self.next_open_question(assessment, pos),
            DistributionDuration::PerSection => self.next_open_section(assessment, pos.section),
        };
        match target {
            Some(to) => {
                self.current = to;
                report.advanced = Some((pos, to));
            }
            // Nothing the learner may still move to has time left.
            None => report.exhausted = true,
        }
        report
    }

    /// The next open question after `from`; failing that, the earliest open
    /// question the learner may go back to.
    fn next_open_question(&self, assessment: &Assessment, from: Position) -> Option<Position> {
        let mut cursor = assessment.next_position(from);
        while let Some(pos) = cursor {
            if self.can_enter(assessment, pos) {
                return Some(pos);
            }
            cursor = assessment.next_position(pos);
        }
        assessment
            .questions()
            .map(|(pos, _)| pos)
            .take_while(|pos| *pos < from)
            .filter(|pos| pos.section == from.section || assessment.can_switch_section())
            .find(|pos| self.can_enter(assessment, *pos))
    }

    fn next_open_section(&self, assessment: &Assessment, from: usize) -> Option<Position> {
        let count = assessment.sections().len();
        let forward = (from + 1..count).chain(if assessment.can_switch_section() {
            0..from
        } else {
            0..0
        });
        forward
            .filter_map(|idx| assessment.first_of_section(idx))
            .find(|pos| self.can_enter(assessment, *pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{per_question, per_section};

    #[test]
    fn question_expiry_advances_within_section() {
        let a = per_question();
        let mut engine = TimerEngine::new(&a);

        for _ in 0..29 {
            assert_eq!(engine.tick(&a).advanced, None);
        }
        let report = engine.tick(&a);
        assert_eq!(
            report.advanced,
            Some((Position::new(0, 0), Position::new(0, 1)))
        );
        assert_eq!(engine.current(), Position::new(0, 1));
        assert!(engine.state().question(Position::START).unwrap().is_expired());
        assert_eq!(engine.test_remaining(), 570);
    }

    #[test]
    fn question_expiry_crosses_into_next_section() {
        let a = per_question();
        let mut engine = TimerEngine::new(&a);
        engine
            .set_current_question(&a, Position::new(0, 1))
            .unwrap();
        for _ in 0..30 {
            engine.tick(&a);
        }
        assert_eq!(engine.current(), Position::new(1, 0));
    }

    #[test]
    fn last_question_expiry_stays_and_reports_exhaustion() {
        let a = per_question();
        let mut engine = TimerEngine::new(&a);
        let mut exhausted = false;
        for _ in 0..120 {
            exhausted |= engine.tick(&a).exhausted;
        }
        assert_eq!(engine.current(), Position::new(1, 1));
        assert!(exhausted);
    }

    #[test]
    fn timers_never_go_negative() {
        let a = per_question();
        let mut engine = TimerEngine::new(&a);
        for _ in 0..2_000 {
            engine.tick(&a);
        }
        let state = engine.state();
        assert_eq!(state.test.remaining(), Some(0));
        // Section one stopped counting when the engine moved past it.
        assert_eq!(state.section(0).unwrap().remaining(), Some(60));
        assert_eq!(state.section(1).unwrap().remaining(), Some(0));
        assert!(state.questions.iter().flatten().all(Countdown::is_expired));
        // Nothing accrues once a countdown is spent.
        assert_eq!(state.test.elapsed(), 600);
        assert!(
            state
                .questions
                .iter()
                .flatten()
                .all(|c| c.elapsed() == 30)
        );
    }

    #[test]
    fn test_expiry_reported_once() {
        let a = per_question();
        let mut engine = TimerEngine::new(&a);
        let crossings = (0..700).filter(|_| engine.tick(&a).test_expired).count();
        assert_eq!(crossings, 1);
    }

    #[test]
    fn section_expiry_moves_to_next_section_when_switching_disallowed() {
        let a = per_section(false);
        let mut engine = TimerEngine::new(&a);
        for _ in 0..60 {
            engine.tick(&a);
        }
        assert_eq!(engine.current(), Position::new(1, 0));
        assert_eq!(
            engine.set_current_question(&a, Position::new(0, 1)),
            Err(TimerError::SectionExpired)
        );
    }

    #[test]
    fn only_active_units_count_down() {
        let a = per_section(true);
        let mut engine = TimerEngine::new(&a);
        for _ in 0..10 {
            engine.tick(&a);
        }
        assert_eq!(engine.state().section(0).unwrap().remaining(), Some(50));
        assert_eq!(engine.state().section(1).unwrap().remaining(), Some(60));
        assert_eq!(engine.state().question(Position::START).unwrap().elapsed(), 10);
        assert_eq!(engine.state().question(Position::START).unwrap().remaining(), None);
    }

    #[test]
    fn rejects_state_for_other_layout() {
        let a = per_question();
        let other = per_section(true);
        let state = TimerState::for_assessment(&a);
        let mut bad = state.clone();
        bad.questions[0].pop();
        assert_eq!(
            TimerEngine::from_state(&other, bad, Position::START),
            Err(TimerError::LayoutMismatch)
        );
        assert!(TimerEngine::from_state(&a, state, Position::new(1, 1)).is_ok());
    }
}
