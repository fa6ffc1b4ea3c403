//! User-facing notices raised while an attempt runs.

use std::fmt;
use std::time::Duration;

use exam_core::session::SubmitReason;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A periodic sync did not reach the server.
    SyncFailed,
    /// Submission attempt `attempt` will start after `delay`.
    SubmitRetrying { attempt: u32, delay: Duration },
    /// Every submission attempt failed; local answers are kept.
    SubmitFailed { attempts: u32 },
    Submitted,
    ForcedSubmit(SubmitReason),
    ChallengeIssued { numbers: [u32; 3], target: u32 },
    ChallengeMissed,
    Announcements { count: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SyncFailed => f.write_str("your responses are not being recorded"),
            Notice::SubmitRetrying { attempt, delay } => write!(
                f,
                "submission failed, retrying (attempt {attempt}) in {}s",
                delay.as_secs()
            ),
            Notice::SubmitFailed { attempts } => write!(
                f,
                "submission failed after {attempts} attempts; your answers are saved on this device"
            ),
            Notice::Submitted => f.write_str("assessment submitted"),
            Notice::ForcedSubmit(reason) => write!(f, "submitting: {reason}"),
            Notice::ChallengeIssued { numbers, target } => write!(
                f,
                "verification: click {target} among {} {} {}",
                numbers[0], numbers[1], numbers[2]
            ),
            Notice::ChallengeMissed => f.write_str("verification missed, media paused"),
            Notice::Announcements { count } => write!(f, "{count} new announcement(s)"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the `log` facade, for runs with nobody watching a
/// terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    #[must_use]
    pub fn level(notice: &Notice) -> log::Level {
        match notice {
            Notice::SyncFailed
            | Notice::SubmitRetrying { .. }
            | Notice::ForcedSubmit(_)
            | Notice::ChallengeMissed => log::Level::Warn,
            Notice::SubmitFailed { .. } => log::Level::Error,
            Notice::Submitted | Notice::ChallengeIssued { .. } | Notice::Announcements { .. } => {
                log::Level::Info
            }
        }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        log::log!(target: "notice", Self::level(&notice), "{notice}");
    }
}

/// Forwards notices to a channel, e.g. for a front end to render.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            log::debug!("notice receiver dropped");
        }
    }
}
