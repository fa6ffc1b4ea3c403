//! Engagement monitors: tab-switch counting and periodic verification
//! challenges, plus the concentration score derived from both.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EvaluationType;

pub const DEFAULT_TAB_SWITCH_THRESHOLD: u32 = 3;
pub const CHALLENGE_INTERVAL_SECS: u32 = 180;
pub const CHALLENGE_TIMEOUT_SECS: u32 = 59;

const TAB_SWITCH_PENALTY: u32 = 10;
const MISSED_PENALTY: u32 = 15;
const WRONG_PENALTY: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProctorError {
    #[error("no verification challenge is pending")]
    NoChallenge,

    #[error("choice {0} is out of range")]
    InvalidChoice(usize),
}

//
// ─── TAB SWITCHES ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    ForceSubmit,
}

/// Counts page-hidden transitions and escalates once at the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSwitchMonitor {
    count: u32,
    threshold: u32,
    escalated: bool,
}

impl Default for TabSwitchMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TAB_SWITCH_THRESHOLD)
    }
}

impl TabSwitchMonitor {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
            escalated: false,
        }
    }

    /// Keep the count but apply a new threshold, e.g. after a restart with
    /// different configuration.
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Record a page-hidden transition.
    ///
    /// Manually evaluated assessments only count switches.
    pub fn page_hidden(&mut self, evaluation: EvaluationType) -> Escalation {
        self.count = self.count.saturating_add(1);
        if evaluation == EvaluationType::Manual || self.escalated || self.count < self.threshold {
            return Escalation::None;
        }
        self.escalated = true;
        Escalation::ForceSubmit
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

//
// ─── VERIFICATION CHALLENGES ───────────────────────────────────────────────────
//

/// Three numbers, one of which the learner must pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    numbers: [u32; 3],
    correct: usize,
    seconds_left: u32,
}

impl VerificationChallenge {
    /// Build a challenge from explicit values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChoice` if `correct` is not 0, 1 or 2.
    pub fn new(numbers: [u32; 3], correct: usize) -> Result<Self, ProctorError> {
        if correct >= numbers.len() {
            return Err(ProctorError::InvalidChoice(correct));
        }
        Ok(Self {
            numbers,
            correct,
            seconds_left: CHALLENGE_TIMEOUT_SECS,
        })
    }

    /// Draw three distinct two-digit numbers and a correct index.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut pool: Vec<u32> = (10..100).collect();
        pool.shuffle(rng);
        let numbers = [pool[0], pool[1], pool[2]];
        Self {
            numbers,
            correct: rng.random_range(0..3),
            seconds_left: CHALLENGE_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn numbers(&self) -> [u32; 3] {
        self.numbers
    }

    /// The number the learner is asked to click.
    #[must_use]
    pub fn target(&self) -> u32 {
        self.numbers[self.correct]
    }

    #[must_use]
    pub fn seconds_left(&self) -> u32 {
        self.seconds_left
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeEvent {
    Issued(VerificationChallenge),
    Missed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeResponse {
    Correct,
    Wrong,
}

/// Issues a challenge after every [`CHALLENGE_INTERVAL_SECS`] of active
/// viewing and tracks missed and wrong responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChallengeMonitor {
    viewing_secs: u32,
    pending: Option<VerificationChallenge>,
    media_paused: bool,
    missed: u32,
    wrong: u32,
}

impl ChallengeMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one second of viewing. A fresh challenge is only drawn from
    /// `rng` when one is due.
    pub fn tick<R: Rng>(&mut self, rng: &mut R) -> Option<ChallengeEvent> {
        if let Some(challenge) = self.pending.as_mut() {
            challenge.seconds_left = challenge.seconds_left.saturating_sub(1);
            if challenge.seconds_left == 0 {
                self.pending = None;
                self.missed = self.missed.saturating_add(1);
                self.media_paused = true;
                return Some(ChallengeEvent::Missed);
            }
            return None;
        }
        if self.media_paused {
            return None;
        }

        self.viewing_secs += 1;
        if self.viewing_secs < CHALLENGE_INTERVAL_SECS {
            return None;
        }
        self.viewing_secs = 0;
        let challenge = VerificationChallenge::generate(rng);
        self.pending = Some(challenge.clone());
        Some(ChallengeEvent::Issued(challenge))
    }

    /// Answer the pending challenge with the index of the clicked number.
    ///
    /// # Errors
    ///
    /// Returns `NoChallenge` when nothing is pending and `InvalidChoice` for
    /// an index outside the three numbers.
    pub fn respond(&mut self, choice: usize) -> Result<ChallengeResponse, ProctorError> {
        let challenge = self.pending.as_ref().ok_or(ProctorError::NoChallenge)?;
        if choice >= challenge.numbers.len() {
            return Err(ProctorError::InvalidChoice(choice));
        }
        let correct = challenge.correct == choice;
        self.pending = None;
        if correct {
            Ok(ChallengeResponse::Correct)
        } else {
            self.wrong = self.wrong.saturating_add(1);
            self.media_paused = true;
            Ok(ChallengeResponse::Wrong)
        }
    }

    pub fn resume_media(&mut self) {
        self.media_paused = false;
    }

    /// Install a specific challenge, replacing any pending one.
    pub fn issue(&mut self, challenge: VerificationChallenge) {
        self.viewing_secs = 0;
        self.pending = Some(challenge);
    }

    #[must_use]
    pub fn pending(&self) -> Option<&VerificationChallenge> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn is_media_paused(&self) -> bool {
        self.media_paused
    }

    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    #[must_use]
    pub fn wrong(&self) -> u32 {
        self.wrong
    }
}

//
// ─── SCORE ─────────────────────────────────────────────────────────────────────
//

/// `100 − (10·tab switches + 15·missed + 10·wrong)`, floored at zero.
#[must_use]
pub fn concentration_score(tab_switches: u32, missed: u32, wrong: u32) -> u32 {
    let penalty = tab_switches
        .saturating_mul(TAB_SWITCH_PENALTY)
        .saturating_add(missed.saturating_mul(MISSED_PENALTY))
        .saturating_add(wrong.saturating_mul(WRONG_PENALTY));
    100_u32.saturating_sub(penalty)
}
