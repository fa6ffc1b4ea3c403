#![forbid(unsafe_code)]

pub mod api;
pub mod attempt_service;
pub mod config;
pub mod error;
pub mod notify;
pub mod status;
pub mod submit_service;
pub mod sync_service;

pub use exam_core::Clock;

pub use api::{AttemptApi, AttemptTarget, HttpAttemptApi, SyncResponse};
pub use attempt_service::{
    AttemptHandle, AttemptLoop, AttemptService, Command, CommandInbox, command_channel,
};
pub use config::{ApiConfig, LoopConfig};
pub use error::{ApiError, AttemptError, ConfigError};
pub use notify::{ChannelNotifier, LogNotifier, Notice, Notifier};
pub use status::SessionStatus;
pub use submit_service::{SubmitOutcome, SubmitRequest, SubmitService};
pub use sync_service::SyncService;
