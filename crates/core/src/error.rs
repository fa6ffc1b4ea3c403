use thiserror::Error;

use crate::model::AssessmentError;
use crate::proctor::ProctorError;
use crate::session::SessionError;
use crate::timer::TimerError;
use crate::tracker::TrackerError;

/// Any error raised by the attempt domain.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Proctor(#[from] ProctorError),
}
