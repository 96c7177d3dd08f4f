//! Submission of composites to the downstream analysis webhook.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groupsnap_core::config::{AnalysisConfig, GroupType};
use groupsnap_core::images::InlineImage;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info};

/// One analysis request, built per flush and sent once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSubmission {
    pub user_id: String,
    pub group_id: String,
    pub group_type: Option<GroupType>,
    #[serde(rename = "combinedImage", serialize_with = "serialize_data_url")]
    pub composite: InlineImage,
    #[serde(rename = "context")]
    pub context_text: String,
    pub captions: Vec<String>,
    #[serde(rename = "totalImages")]
    pub image_count: usize,
    pub has_multiple_images: bool,
    #[serde(rename = "timestamp")]
    pub submitted_at: DateTime<Utc>,
}

fn serialize_data_url<S: Serializer>(image: &InlineImage, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&image.to_data_url())
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request timed out after {0:?}")]
    Timeout(Duration),
    #[error("analysis request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("analysis service returned status {0}")]
    Status(u16),
}

/// Downstream analysis service. `Ok(None)` means no usable verdict.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn submit(&self, submission: &AnalysisSubmission)
    -> Result<Option<String>, AnalysisError>;
}

#[derive(Clone)]
pub struct WebhookAnalysisClient {
    http: reqwest::Client,
    webhook_url: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    response: Option<String>,
}

impl WebhookAnalysisClient {
    pub fn new(settings: &AnalysisConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: settings.webhook_url().map(str::to_string),
            timeout: settings.timeout(),
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> AnalysisError {
        if err.is_timeout() {
            AnalysisError::Timeout(self.timeout)
        } else {
            AnalysisError::Transport(err)
        }
    }
}

#[async_trait]
impl AnalysisClient for WebhookAnalysisClient {
    async fn submit(
        &self,
        submission: &AnalysisSubmission,
    ) -> Result<Option<String>, AnalysisError> {
        let Some(url) = self.webhook_url.as_deref() else {
            info!("analysis webhook not configured, skipping submission");
            return Ok(None);
        };

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(submission)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.map_transport(err))?;
        Ok(parse_verdict(&body))
    }
}

/// Extracts a non-blank `response` string; anything else is "no verdict".
fn parse_verdict(body: &[u8]) -> Option<String> {
    match serde_json::from_slice::<AnalysisReply>(body) {
        Ok(reply) => reply
            .response
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        Err(err) => {
            debug!("analysis reply is not a verdict object: {err}");
            None
        }
    }
}
