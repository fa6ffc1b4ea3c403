use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Question, QuestionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("question {question} accepts a single value, got {given}")]
    TooManySelections { question: QuestionId, given: usize },

    #[error("option {option} does not belong to question {question}")]
    UnknownOption { question: QuestionId, option: String },
}

/// Per-question flags, created on first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuestionState {
    pub visited: bool,
    pub answered: bool,
    pub marked_for_review: bool,
}

/// Question id → selected option ids, or a single free-text / numeric value.
pub type AnswerMap = BTreeMap<QuestionId, Vec<String>>;

/// Aggregate counters for a question palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerCounts {
    pub answered: usize,
    pub visited_unanswered: usize,
    pub marked_for_review: usize,
}

/// Answers and question flags for one attempt.
///
/// `visited` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnswerTracker {
    answers: AnswerMap,
    states: BTreeMap<QuestionId, QuestionState>,
}

impl AnswerTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the answer for `question`.
    ///
    /// # Errors
    ///
    /// Returns `TooManySelections` when a single-valued question receives more
    /// than one value, and `UnknownOption` when a choice question receives an
    /// id it does not offer.
    pub fn set_answer(&mut self, question: &Question, values: Vec<String>) -> Result<(), TrackerError> {
        if question.kind.is_single_valued() && values.len() > 1 {
            return Err(TrackerError::TooManySelections {
                question: question.id.clone(),
                given: values.len(),
            });
        }
        if question.kind.is_choice() {
            if let Some(bad) = values
                .iter()
                .find(|v| !question.options.iter().any(|o| o.id.as_str() == v.as_str()))
            {
                return Err(TrackerError::UnknownOption {
                    question: question.id.clone(),
                    option: bad.clone(),
                });
            }
        }

        let answered = !values.is_empty();
        self.answers.insert(question.id.clone(), values);
        self.state_mut(&question.id).answered = answered;
        Ok(())
    }

    /// Toggle the review flag. Leaves the answer untouched.
    pub fn mark_for_review(&mut self, question: &QuestionId) -> bool {
        let state = self.state_mut(question);
        state.marked_for_review = !state.marked_for_review;
        state.marked_for_review
    }

    pub fn clear_response(&mut self, question: &QuestionId) {
        self.answers.insert(question.clone(), Vec::new());
        self.state_mut(question).answered = false;
    }

    pub fn visit(&mut self, question: &QuestionId) {
        self.state_mut(question).visited = true;
    }

    #[must_use]
    pub fn answer(&self, question: &QuestionId) -> &[String] {
        self.answers.get(question).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    /// Flags for `question`; untouched questions report all-false.
    #[must_use]
    pub fn state(&self, question: &QuestionId) -> QuestionState {
        self.states.get(question).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn counts(&self) -> TrackerCounts {
        self.states
            .values()
            .fold(TrackerCounts::default(), |mut acc, s| {
                if s.answered {
                    acc.answered += 1;
                } else if s.visited {
                    acc.visited_unanswered += 1;
                }
                if s.marked_for_review {
                    acc.marked_for_review += 1;
                }
                acc
            })
    }

    fn state_mut(&mut self, question: &QuestionId) -> &mut QuestionState {
        self.states.entry(question.clone()).or_default()
    }
}
