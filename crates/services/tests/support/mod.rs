#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use exam_core::envelope::SyncEnvelope;
use exam_core::model::{
    Assessment, AssessmentId, DistributionDuration, EvaluationType, OptionId, Question,
    QuestionId, QuestionOption, QuestionType, Section, SectionId,
};
use serde_json::Value;
use services::{ApiError, AttemptApi, AttemptTarget, SyncResponse};

/// Records every call; fails the first `fail_submits` submissions and every
/// sync while `fail_syncs` is set.
#[derive(Default)]
pub struct RecordingApi {
    pub syncs: Mutex<Vec<SyncEnvelope>>,
    pub submits: Mutex<Vec<(SyncEnvelope, EvaluationType, Option<String>)>>,
    pub fail_submits: AtomicU32,
    pub fail_syncs: bool,
    pub announcements: Option<Value>,
}

impl RecordingApi {
    pub fn failing_submits(n: u32) -> Self {
        Self {
            fail_submits: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().unwrap().len()
    }

    pub fn last_submit(&self) -> Option<(SyncEnvelope, EvaluationType, Option<String>)> {
        self.submits.lock().unwrap().last().cloned()
    }
}

fn unavailable() -> ApiError {
    ApiError::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE)
}

#[async_trait]
impl AttemptApi for RecordingApi {
    async fn sync(
        &self,
        _target: &AttemptTarget,
        envelope: &SyncEnvelope,
    ) -> Result<SyncResponse, ApiError> {
        self.syncs.lock().unwrap().push(envelope.clone());
        if self.fail_syncs {
            return Err(unavailable());
        }
        Ok(SyncResponse {
            announcements: self.announcements.clone(),
        })
    }

    async fn submit(
        &self,
        _target: &AttemptTarget,
        envelope: &SyncEnvelope,
        evaluation: EvaluationType,
        file_ref: Option<&str>,
    ) -> Result<(), ApiError> {
        self.submits.lock().unwrap().push((
            envelope.clone(),
            evaluation,
            file_ref.map(str::to_owned),
        ));
        let remaining = self.fail_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(unavailable());
        }
        Ok(())
    }
}

fn choice(id: &str, serial: u32) -> Question {
    Question {
        id: QuestionId::new(id),
        kind: QuestionType::SingleChoice,
        serial,
        duration_secs: None,
        options: vec![
            QuestionOption {
                id: OptionId::new("a"),
                text: "A".into(),
            },
            QuestionOption {
                id: OptionId::new("b"),
                text: "B".into(),
            },
        ],
    }
}

/// One section of two choice questions, timed per section.
pub fn quiz(test_secs: u32, evaluation: EvaluationType) -> Assessment {
    Assessment::new(
        AssessmentId::new("quiz"),
        "Quiz",
        test_secs,
        vec![Section {
            id: SectionId::new("s1"),
            name: "Only".into(),
            duration_secs: Some(test_secs),
            questions: vec![choice("q1", 1), choice("q2", 2)],
        }],
        false,
        DistributionDuration::PerSection,
        evaluation,
    )
    .unwrap()
}
