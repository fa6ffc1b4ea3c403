use std::env;
use std::time::Duration;

use exam_core::{RetryPolicy, SessionConfig};
use url::Url;

use crate::error::ConfigError;

const BASE_URL_VAR: &str = "EXAM_API_BASE_URL";
const TOKEN_VAR: &str = "EXAM_API_TOKEN";
const THRESHOLD_VAR: &str = "EXAM_TAB_SWITCH_THRESHOLD";

/// Where the attempt API lives and how to authenticate against it.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub sync_path: String,
    pub submit_path: String,
    pub manual_submit_path: String,
}

impl ApiConfig {
    /// Build a config for `base_url` with the default endpoint paths.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Url` if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            token: None,
            sync_path: "attempts/sync".into(),
            submit_path: "attempts/submit".into(),
            manual_submit_path: "attempts/submit/manual".into(),
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read `EXAM_API_BASE_URL` and the optional `EXAM_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the base URL is missing or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var(BASE_URL_VAR).map_err(|_| ConfigError::Missing(BASE_URL_VAR))?;
        let config = Self::new(&base_url)?;
        match env::var(TOKEN_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(config.with_token(token.trim())),
            _ => Ok(config),
        }
    }
}

/// Cadences and limits for a running attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopConfig {
    pub session: SessionConfig,
    pub retry: RetryPolicy,
}

impl LoopConfig {
    /// Defaults, with `EXAM_TAB_SWITCH_THRESHOLD` applied when set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the threshold is not a positive
    /// integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = env::var(THRESHOLD_VAR) {
            config.session.tab_switch_threshold = parse_threshold(&raw)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base: Duration, step: Duration) -> Self {
        self.retry = RetryPolicy::new(max_attempts, base, step);
        self
    }
}

fn parse_threshold(raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::Invalid {
            name: THRESHOLD_VAR,
            value: raw.to_string(),
        }),
    }
}
