#![forbid(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod model;
pub mod proctor;
pub mod retry;
pub mod session;
pub mod time;
pub mod timer;
pub mod tracker;

pub use error::Error;
pub use retry::RetryPolicy;
pub use session::{AttemptSession, SessionConfig, SessionEvent, SessionSnapshot, SubmissionState};
pub use time::Clock;
