use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AssessmentId, OptionId, QuestionId, SectionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("assessment duration must be greater than zero")]
    ZeroDuration,

    #[error("assessment has no sections")]
    NoSections,

    #[error("section {0} has no questions")]
    EmptySection(SectionId),

    #[error("section {0} needs a duration when time is distributed per section")]
    MissingSectionDuration(SectionId),

    #[error("question {0} needs a duration when time is distributed per question")]
    MissingQuestionDuration(QuestionId),

    #[error("choice question {0} has no options")]
    MissingOptions(QuestionId),

    #[error("duplicate section id: {0}")]
    DuplicateSection(SectionId),

    #[error("duplicate question id: {0}")]
    DuplicateQuestion(QuestionId),
}

//
// ─── ENUMS ─────────────────────────────────────────────────────────────────────
//

/// Which timer granularity is authoritative for forced advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionDuration {
    PerQuestion,
    PerSection,
}

/// How responses are graded. Manual grading disables tab-switch escalation
/// and submits through the manual endpoint with an uploaded file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationType {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "MCQS")]
    SingleChoice,
    #[serde(rename = "MCQM")]
    MultiChoice,
    #[serde(rename = "TRUE_FALSE")]
    TrueFalse,
    #[serde(rename = "NUMERIC")]
    Numeric,
    #[serde(rename = "ONE_WORD")]
    OneWord,
    #[serde(rename = "LONG_ANSWER")]
    LongAnswer,
}

impl QuestionType {
    /// Choice questions are answered with option ids.
    #[must_use]
    pub fn is_choice(self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice | QuestionType::MultiChoice | QuestionType::TrueFalse
        )
    }

    /// At most one value may be selected.
    #[must_use]
    pub fn is_single_valued(self) -> bool {
        !matches!(self, QuestionType::MultiChoice)
    }
}

//
// ─── QUESTIONS & SECTIONS ──────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub serial: u32,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    pub questions: Vec<Question>,
}

/// A navigation position: section index and question index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub section: usize,
    pub question: usize,
}

impl Position {
    pub const START: Position = Position {
        section: 0,
        question: 0,
    };

    #[must_use]
    pub fn new(section: usize, question: usize) -> Self {
        Self { section, question }
    }
}

//
// ─── ASSESSMENT ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Deserialize)]
struct AssessmentDraft {
    id: AssessmentId,
    name: String,
    duration_secs: u32,
    sections: Vec<Section>,
    #[serde(default)]
    can_switch_section: bool,
    distribution: DistributionDuration,
    #[serde(default)]
    evaluation: EvaluationType,
}

/// A validated assessment definition.
///
/// Deserialization runs the same checks as [`Assessment::new`], so a loaded
/// assessment always has at least one section, no empty sections, and the
/// durations its distribution mode requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AssessmentDraft")]
pub struct Assessment {
    id: AssessmentId,
    name: String,
    duration_secs: u32,
    sections: Vec<Section>,
    can_switch_section: bool,
    distribution: DistributionDuration,
    evaluation: EvaluationType,
}

impl TryFrom<AssessmentDraft> for Assessment {
    type Error = AssessmentError;

    fn try_from(draft: AssessmentDraft) -> Result<Self, Self::Error> {
        Assessment::new(
            draft.id,
            draft.name,
            draft.duration_secs,
            draft.sections,
            draft.can_switch_section,
            draft.distribution,
            draft.evaluation,
        )
    }
}

impl Assessment {
    /// Build and validate an assessment.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError` if the structure is empty, ids repeat, or a
    /// duration required by `distribution` is missing.
    pub fn new(
        id: AssessmentId,
        name: impl Into<String>,
        duration_secs: u32,
        sections: Vec<Section>,
        can_switch_section: bool,
        distribution: DistributionDuration,
        evaluation: EvaluationType,
    ) -> Result<Self, AssessmentError> {
        if duration_secs == 0 {
            return Err(AssessmentError::ZeroDuration);
        }
        if sections.is_empty() {
            return Err(AssessmentError::NoSections);
        }

        let mut section_ids = HashSet::new();
        let mut question_ids = HashSet::new();
        for section in &sections {
            if !section_ids.insert(&section.id) {
                return Err(AssessmentError::DuplicateSection(section.id.clone()));
            }
            if section.questions.is_empty() {
                return Err(AssessmentError::EmptySection(section.id.clone()));
            }
            if distribution == DistributionDuration::PerSection
                && section.duration_secs.unwrap_or(0) == 0
            {
                return Err(AssessmentError::MissingSectionDuration(section.id.clone()));
            }
            for question in &section.questions {
                if !question_ids.insert(&question.id) {
                    return Err(AssessmentError::DuplicateQuestion(question.id.clone()));
                }
                if distribution == DistributionDuration::PerQuestion
                    && question.duration_secs.unwrap_or(0) == 0
                {
                    return Err(AssessmentError::MissingQuestionDuration(
                        question.id.clone(),
                    ));
                }
                if question.kind.is_choice() && question.options.is_empty() {
                    return Err(AssessmentError::MissingOptions(question.id.clone()));
                }
            }
        }

        Ok(Self {
            id,
            name: name.into(),
            duration_secs,
            sections,
            can_switch_section,
            distribution,
            evaluation,
        })
    }

    #[must_use]
    pub fn id(&self) -> &AssessmentId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn can_switch_section(&self) -> bool {
        self.can_switch_section
    }

    #[must_use]
    pub fn distribution(&self) -> DistributionDuration {
        self.distribution
    }

    #[must_use]
    pub fn evaluation(&self) -> EvaluationType {
        self.evaluation
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    #[must_use]
    pub fn question_at(&self, pos: Position) -> Option<&Question> {
        self.sections
            .get(pos.section)
            .and_then(|s| s.questions.get(pos.question))
    }

    #[must_use]
    pub fn position_of(&self, id: &QuestionId) -> Option<Position> {
        self.sections.iter().enumerate().find_map(|(si, section)| {
            section
                .questions
                .iter()
                .position(|q| &q.id == id)
                .map(|qi| Position::new(si, qi))
        })
    }

    #[must_use]
    pub fn question(&self, id: &QuestionId) -> Option<&Question> {
        self.position_of(id).and_then(|pos| self.question_at(pos))
    }

    /// The position after `pos` in reading order, crossing section boundaries.
    #[must_use]
    pub fn next_position(&self, pos: Position) -> Option<Position> {
        let section = self.sections.get(pos.section)?;
        if pos.question + 1 < section.questions.len() {
            return Some(Position::new(pos.section, pos.question + 1));
        }
        self.first_of_section(pos.section + 1)
    }

    /// The position before `pos` in reading order, crossing section boundaries.
    #[must_use]
    pub fn previous_position(&self, pos: Position) -> Option<Position> {
        if pos.question > 0 {
            return Some(Position::new(pos.section, pos.question - 1));
        }
        let prev = pos.section.checked_sub(1)?;
        let len = self.sections.get(prev)?.questions.len();
        Some(Position::new(prev, len.checked_sub(1)?))
    }

    #[must_use]
    pub fn first_of_section(&self, section: usize) -> Option<Position> {
        self.sections
            .get(section)
            .filter(|s| !s.questions.is_empty())
            .map(|_| Position::new(section, 0))
    }

    /// Iterate every question with its position, in reading order.
    pub fn questions(&self) -> impl Iterator<Item = (Position, &Question)> {
        self.sections.iter().enumerate().flat_map(|(si, section)| {
            section
                .questions
                .iter()
                .enumerate()
                .map(move |(qi, q)| (Position::new(si, qi), q))
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn choice(id: &str, serial: u32, secs: Option<u32>) -> Question {
        Question {
            id: QuestionId::new(id),
            kind: QuestionType::SingleChoice,
            serial,
            duration_secs: secs,
            options: vec![
                QuestionOption {
                    id: OptionId::new("optA"),
                    text: "A".into(),
                },
                QuestionOption {
                    id: OptionId::new("optB"),
                    text: "B".into(),
                },
            ],
        }
    }

    pub fn typed(id: &str, serial: u32, kind: QuestionType, secs: Option<u32>) -> Question {
        Question {
            id: QuestionId::new(id),
            kind,
            serial,
            duration_secs: secs,
            options: Vec::new(),
        }
    }

    pub fn section(id: &str, secs: Option<u32>, questions: Vec<Question>) -> Section {
        Section {
            id: SectionId::new(id),
            name: format!("Section {id}"),
            duration_secs: secs,
            questions,
        }
    }

    /// Two sections of two single-choice questions, 30 s per question.
    pub fn per_question() -> Assessment {
        Assessment::new(
            AssessmentId::new("a1"),
            "Quiz",
            600,
            vec![
                section(
                    "s1",
                    Some(120),
                    vec![choice("q1", 1, Some(30)), choice("q2", 2, Some(30))],
                ),
                section(
                    "s2",
                    Some(120),
                    vec![choice("q3", 3, Some(30)), choice("q4", 4, Some(30))],
                ),
            ],
            true,
            DistributionDuration::PerQuestion,
            EvaluationType::Auto,
        )
        .unwrap()
    }

    pub fn per_section(can_switch: bool) -> Assessment {
        Assessment::new(
            AssessmentId::new("a2"),
            "Sectioned",
            600,
            vec![
                section(
                    "s1",
                    Some(60),
                    vec![choice("q1", 1, None), choice("q2", 2, None)],
                ),
                section(
                    "s2",
                    Some(60),
                    vec![
                        typed("q3", 3, QuestionType::Numeric, None),
                        typed("q4", 4, QuestionType::LongAnswer, None),
                    ],
                ),
            ],
            can_switch,
            DistributionDuration::PerSection,
            EvaluationType::Auto,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn navigation_crosses_sections() {
        let a = per_question();
        assert_eq!(a.next_position(Position::new(0, 1)), Some(Position::new(1, 0)));
        assert_eq!(a.next_position(Position::new(1, 1)), None);
        assert_eq!(
            a.previous_position(Position::new(1, 0)),
            Some(Position::new(0, 1))
        );
        assert_eq!(a.previous_position(Position::START), None);
        assert_eq!(a.position_of(&QuestionId::new("q3")), Some(Position::new(1, 0)));
        assert_eq!(a.question_count(), 4);
    }

    #[test]
    fn per_question_requires_question_durations() {
        let err = Assessment::new(
            AssessmentId::new("a"),
            "x",
            60,
            vec![section("s1", None, vec![choice("q1", 1, None)])],
            false,
            DistributionDuration::PerQuestion,
            EvaluationType::Auto,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AssessmentError::MissingQuestionDuration(QuestionId::new("q1"))
        );
    }

    #[test]
    fn rejects_duplicate_questions() {
        let err = Assessment::new(
            AssessmentId::new("a"),
            "x",
            60,
            vec![
                section("s1", Some(10), vec![choice("q1", 1, None)]),
                section("s2", Some(10), vec![choice("q1", 2, None)]),
            ],
            false,
            DistributionDuration::PerSection,
            EvaluationType::Auto,
        )
        .unwrap_err();
        assert_eq!(err, AssessmentError::DuplicateQuestion(QuestionId::new("q1")));
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{
            "id": "a9",
            "name": "Empty",
            "duration_secs": 60,
            "sections": [],
            "distribution": "PER_SECTION"
        }"#;
        let err = serde_json::from_str::<Assessment>(json).unwrap_err();
        assert!(err.to_string().contains("no sections"));
    }

    #[test]
    fn deserializes_wire_names() {
        let json = r#"{
            "id": "a9",
            "name": "Quiz",
            "duration_secs": 60,
            "can_switch_section": true,
            "distribution": "PER_QUESTION",
            "evaluation": "MANUAL",
            "sections": [{
                "id": "s1",
                "name": "One",
                "questions": [
                    {"id": "q1", "type": "NUMERIC", "serial": 1, "duration_secs": 20},
                    {"id": "q2", "type": "MCQM", "serial": 2, "duration_secs": 20,
                     "options": [{"id": "o1", "text": "x"}]}
                ]
            }]
        }"#;
        let a: Assessment = serde_json::from_str(json).unwrap();
        assert_eq!(a.evaluation(), EvaluationType::Manual);
        assert_eq!(a.distribution(), DistributionDuration::PerQuestion);
        assert_eq!(a.sections()[0].questions[1].kind, QuestionType::MultiChoice);
        assert!(a.can_switch_section());
    }
}
