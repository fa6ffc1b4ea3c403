//! Outbound progress snapshot posted on every sync and on submission.

use serde::{Deserialize, Serialize};

use crate::model::{Assessment, AssessmentId, AttemptId, Position, Question, QuestionId, QuestionType, SectionId};
use crate::timer::TimerState;
use crate::tracker::AnswerTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Live,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypedResponse {
    Numeric {
        #[serde(rename = "validAnswer")]
        valid_answer: Option<f64>,
    },
    OneWord { answer: String },
    LongAnswer { answer: String },
}

/// Per-question response payload; shape depends on the question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Typed(TypedResponse),
    Choice {
        #[serde(rename = "optionIds")]
        option_ids: Vec<String>,
    },
}

impl ResponseData {
    #[must_use]
    pub fn from_answer(kind: QuestionType, values: &[String]) -> Self {
        let first = values.first().map(|v| v.trim().to_owned());
        match kind {
            QuestionType::Numeric => ResponseData::Typed(TypedResponse::Numeric {
                valid_answer: first
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|v| v.is_finite()),
            }),
            QuestionType::OneWord => ResponseData::Typed(TypedResponse::OneWord {
                answer: first.unwrap_or_default(),
            }),
            QuestionType::LongAnswer => ResponseData::Typed(TypedResponse::LongAnswer {
                answer: first.unwrap_or_default(),
            }),
            QuestionType::SingleChoice | QuestionType::MultiChoice | QuestionType::TrueFalse => {
                ResponseData::Choice {
                    option_ids: values.to_vec(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionProgress {
    pub question_id: QuestionId,
    pub question_duration_left_in_seconds: u32,
    pub time_taken_in_seconds: u32,
    pub is_marked_for_review: bool,
    pub is_visited: bool,
    pub response_data: ResponseData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    pub section_id: SectionId,
    pub section_duration_left_in_seconds: u32,
    pub time_elapsed_in_seconds: u32,
    pub questions: Vec<QuestionProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentProgress {
    pub assessment_id: AssessmentId,
    pub entire_test_duration_left_in_seconds: u32,
    pub time_elapsed_in_seconds: u32,
    pub status: AttemptStatus,
    pub tab_switch_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub attempt_id: AttemptId,
    /// Client time of this snapshot, in milliseconds since the epoch.
    pub client_last_sync: i64,
    pub assessment: AssessmentProgress,
    pub sections: Vec<SectionProgress>,
}

/// Borrowed view of everything an envelope is built from.
pub struct EnvelopeSource<'a> {
    pub attempt_id: &'a AttemptId,
    pub assessment: &'a Assessment,
    pub timers: &'a TimerState,
    pub tracker: &'a AnswerTracker,
    pub tab_switch_count: u32,
}

impl SyncEnvelope {
    #[must_use]
    pub fn build(source: &EnvelopeSource<'_>, status: AttemptStatus, client_last_sync: i64) -> Self {
        let sections = source
            .assessment
            .sections()
            .iter()
            .enumerate()
            .map(|(si, section)| {
                let countdown = source.timers.section(si);
                SectionProgress {
                    section_id: section.id.clone(),
                    section_duration_left_in_seconds: countdown
                        .map_or(0, |c| c.remaining_or_zero()),
                    time_elapsed_in_seconds: countdown.map_or(0, |c| c.elapsed()),
                    questions: section
                        .questions
                        .iter()
                        .enumerate()
                        .map(|(qi, q)| question_progress(source, Position::new(si, qi), q))
                        .collect(),
                }
            })
            .collect();

        Self {
            attempt_id: source.attempt_id.clone(),
            client_last_sync,
            assessment: AssessmentProgress {
                assessment_id: source.assessment.id().clone(),
                entire_test_duration_left_in_seconds: source.timers.test.remaining_or_zero(),
                time_elapsed_in_seconds: source.timers.test.elapsed(),
                status,
                tab_switch_count: source.tab_switch_count,
            },
            sections,
        }
    }

    /// The stringified form carried in the request's `json_content` field.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json_content(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn question_progress(source: &EnvelopeSource<'_>, pos: Position, question: &Question) -> QuestionProgress {
    let countdown = source.timers.question(pos);
    let state = source.tracker.state(&question.id);
    QuestionProgress {
        question_id: question.id.clone(),
        question_duration_left_in_seconds: countdown.map_or(0, |c| c.remaining_or_zero()),
        time_taken_in_seconds: countdown.map_or(0, |c| c.elapsed()),
        is_marked_for_review: state.marked_for_review,
        is_visited: state.visited,
        response_data: ResponseData::from_answer(question.kind, source.tracker.answer(&question.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{per_question, per_section};
    use crate::timer::TimerEngine;
    use serde_json::json;

    #[test]
    fn response_data_wire_shapes() {
        let numeric = ResponseData::from_answer(QuestionType::Numeric, &["4.5".into()]);
        assert_eq!(
            serde_json::to_value(&numeric).unwrap(),
            json!({"type": "NUMERIC", "validAnswer": 4.5})
        );

        let bad_numeric = ResponseData::from_answer(QuestionType::Numeric, &["four".into()]);
        assert_eq!(
            serde_json::to_value(&bad_numeric).unwrap(),
            json!({"type": "NUMERIC", "validAnswer": null})
        );

        let word = ResponseData::from_answer(QuestionType::OneWord, &["Paris".into()]);
        assert_eq!(
            serde_json::to_value(&word).unwrap(),
            json!({"type": "ONE_WORD", "answer": "Paris"})
        );

        let long = ResponseData::from_answer(QuestionType::LongAnswer, &[]);
        assert_eq!(
            serde_json::to_value(&long).unwrap(),
            json!({"type": "LONG_ANSWER", "answer": ""})
        );

        let choice =
            ResponseData::from_answer(QuestionType::MultiChoice, &["a".into(), "b".into()]);
        assert_eq!(
            serde_json::to_value(&choice).unwrap(),
            json!({"optionIds": ["a", "b"]})
        );
    }

    #[test]
    fn response_data_reads_back() {
        let choice: ResponseData = serde_json::from_value(json!({"optionIds": ["x"]})).unwrap();
        assert_eq!(
            choice,
            ResponseData::Choice {
                option_ids: vec!["x".into()]
            }
        );
        let word: ResponseData =
            serde_json::from_value(json!({"type": "ONE_WORD", "answer": "y"})).unwrap();
        assert!(matches!(word, ResponseData::Typed(TypedResponse::OneWord { .. })));
    }

    #[test]
    fn envelope_uses_camel_case_and_timer_values() {
        let assessment = per_question();
        let mut engine = TimerEngine::new(&assessment);
        for _ in 0..5 {
            engine.tick(&assessment);
        }
        let mut tracker = AnswerTracker::new();
        let q1 = &assessment.sections()[0].questions[0];
        tracker.visit(&q1.id);
        tracker.set_answer(q1, vec!["optA".into()]).unwrap();

        let attempt = AttemptId::new("t1");
        let envelope = SyncEnvelope::build(
            &EnvelopeSource {
                attempt_id: &attempt,
                assessment: &assessment,
                timers: engine.state(),
                tracker: &tracker,
                tab_switch_count: 2,
            },
            AttemptStatus::Live,
            1_700_000_000_000,
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["attemptId"], "t1");
        assert_eq!(value["clientLastSync"], 1_700_000_000_000_i64);
        assert_eq!(value["assessment"]["assessmentId"], "a1");
        assert_eq!(value["assessment"]["entireTestDurationLeftInSeconds"], 595);
        assert_eq!(value["assessment"]["timeElapsedInSeconds"], 5);
        assert_eq!(value["assessment"]["status"], "LIVE");
        assert_eq!(value["assessment"]["tabSwitchCount"], 2);

        let first = &value["sections"][0];
        assert_eq!(first["sectionId"], "s1");
        assert_eq!(first["sectionDurationLeftInSeconds"], 115);
        assert_eq!(first["questions"][0]["questionDurationLeftInSeconds"], 25);
        assert_eq!(first["questions"][0]["timeTakenInSeconds"], 5);
        assert_eq!(first["questions"][0]["isVisited"], true);
        assert_eq!(first["questions"][0]["isMarkedForReview"], false);
        assert_eq!(
            first["questions"][0]["responseData"],
            json!({"optionIds": ["optA"]})
        );
        assert_eq!(first["questions"][1]["isVisited"], false);
    }

    #[test]
    fn untimed_questions_report_zero_remaining() {
        let assessment = per_section(true);
        let engine = TimerEngine::new(&assessment);
        let tracker = AnswerTracker::new();
        let attempt = AttemptId::new("t2");
        let envelope = SyncEnvelope::build(
            &EnvelopeSource {
                attempt_id: &attempt,
                assessment: &assessment,
                timers: engine.state(),
                tracker: &tracker,
                tab_switch_count: 0,
            },
            AttemptStatus::Ended,
            0,
        );
        assert_eq!(envelope.sections[1].questions[0].question_duration_left_in_seconds, 0);
        assert_eq!(envelope.sections[1].section_duration_left_in_seconds, 60);
        assert_eq!(envelope.assessment.status, AttemptStatus::Ended);
        assert!(envelope.to_json_content().unwrap().contains("\"ENDED\""));
    }
}
