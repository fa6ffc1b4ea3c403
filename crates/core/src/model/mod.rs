mod announcement;
mod assessment;
mod ids;

pub use announcement::Announcement;
pub use assessment::{
    Assessment, AssessmentError, DistributionDuration, EvaluationType, Position, Question,
    QuestionOption, QuestionType, Section,
};
pub use ids::{AssessmentId, AttemptId, OptionId, ParseIdError, QuestionId, SectionId};

#[cfg(test)]
pub(crate) use assessment::fixtures;
