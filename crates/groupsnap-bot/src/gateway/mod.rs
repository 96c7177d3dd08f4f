use std::time::Duration;

use async_trait::async_trait;
use groupsnap_core::config::GatewayConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

mod types;

pub use types::{MediaInfo, MessagePayload, Timestamp, WebhookEvent};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outbound side of the chat gateway.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Sends `text` to `chat_id`, optionally mentioning `mention_user_id`.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        mention_user_id: Option<&str>,
    ) -> Result<(), GatewayError>;
}

#[derive(Clone)]
pub struct WahaClient {
    http: reqwest::Client,
    base_url: String,
    session: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WahaClient {
    pub fn new(settings: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.api_url.trim().trim_end_matches('/').to_string(),
            session: settings.session.clone(),
            api_key: settings.effective_api_key(),
            timeout: settings.send_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    async fn post<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<(), GatewayError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let mut request = self.http.post(url).timeout(self.timeout).json(body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatGateway for WahaClient {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        mention_user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mentions = mention_user_id.map(mention_jid).into_iter().collect();
        let request = SendTextRequest {
            session: &self.session,
            chat_id,
            text,
            mentions,
        };
        self.post("sendText", &request).await?;
        debug!(chat_id, "message sent");
        Ok(())
    }
}

/// Number part of a user id (`5511999@c.us` → `5511999`).
pub fn user_number(user_id: &str) -> &str {
    user_id.split('@').next().unwrap_or(user_id)
}

/// Contact JID used in the `mentions` list.
pub fn mention_jid(user_id: &str) -> String {
    format!("{}@c.us", user_number(user_id))
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    session: &'a str,
    #[serde(rename = "chatId")]
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mentions: Vec<String>,
}
