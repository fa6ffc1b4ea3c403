use async_trait::async_trait;
use exam_core::envelope::SyncEnvelope;
use exam_core::model::{AssessmentId, AttemptId, EvaluationType};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;

/// Identifies an attempt on the server; sent as query parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptTarget {
    pub attempt_id: AttemptId,
    pub assessment_id: AssessmentId,
}

impl AttemptTarget {
    #[must_use]
    pub fn new(attempt_id: AttemptId, assessment_id: AssessmentId) -> Self {
        Self {
            attempt_id,
            assessment_id,
        }
    }

    fn query(&self) -> [(&'static str, &str); 2] {
        [
            ("attemptId", self.attempt_id.as_str()),
            ("assessmentId", self.assessment_id.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub announcements: Option<Value>,
}

/// Remote side of an attempt: periodic progress sync and final submission.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    /// Post in-progress state.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failures or a non-success status.
    async fn sync(
        &self,
        target: &AttemptTarget,
        envelope: &SyncEnvelope,
    ) -> Result<SyncResponse, ApiError>;

    /// Post the final state. Manually evaluated attempts may carry an
    /// uploaded file reference.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failures or a non-success status.
    async fn submit(
        &self,
        target: &AttemptTarget,
        envelope: &SyncEnvelope,
        evaluation: EvaluationType,
        file_ref: Option<&str>,
    ) -> Result<(), ApiError>;
}

#[derive(Debug, Serialize)]
struct ProgressBody<'a> {
    json_content: String,
    #[serde(rename = "fileId", skip_serializing_if = "Option::is_none")]
    file_id: Option<&'a str>,
}

impl<'a> ProgressBody<'a> {
    fn new(envelope: &SyncEnvelope, file_id: Option<&'a str>) -> Result<Self, ApiError> {
        Ok(Self {
            json_content: envelope.to_json_content()?,
            file_id,
        })
    }
}

/// `reqwest` client for the attempt endpoints.
#[derive(Clone)]
pub struct HttpAttemptApi {
    client: Client,
    config: ApiConfig,
}

impl HttpAttemptApi {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.config.base_url.join(path)?)
    }

    async fn post(
        &self,
        url: Url,
        target: &AttemptTarget,
        body: &ProgressBody<'_>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.client.post(url).query(&target.query()).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(response)
    }
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    async fn sync(
        &self,
        target: &AttemptTarget,
        envelope: &SyncEnvelope,
    ) -> Result<SyncResponse, ApiError> {
        let url = self.endpoint(&self.config.sync_path)?;
        let body = ProgressBody::new(envelope, None)?;
        let response = self.post(url, target, &body).await?;

        // An empty or non-JSON body carries no announcements.
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice::<SyncResponse>(&bytes).unwrap_or_default())
    }

    async fn submit(
        &self,
        target: &AttemptTarget,
        envelope: &SyncEnvelope,
        evaluation: EvaluationType,
        file_ref: Option<&str>,
    ) -> Result<(), ApiError> {
        let (path, file_id) = match evaluation {
            EvaluationType::Auto => (&self.config.submit_path, None),
            EvaluationType::Manual => (&self.config.manual_submit_path, file_ref),
        };
        let url = self.endpoint(path)?;
        let body = ProgressBody::new(envelope, file_id)?;
        self.post(url, target, &body).await?;
        Ok(())
    }
}
