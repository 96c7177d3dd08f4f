use serde::Deserialize;

/// Envelope posted by the gateway to the webhook.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePayload>,
}

impl WebhookEvent {
    pub fn is_message(&self) -> bool {
        self.event.as_deref() == Some("message") && self.payload.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub media: Option<MediaInfo>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// Gateways send unix seconds as a number, sometimes as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl Timestamp {
    pub fn as_unix_seconds(&self) -> Option<i64> {
        match self {
            Timestamp::Seconds(value) => Some(*value),
            Timestamp::Fractional(value) => value.is_finite().then_some(*value as i64),
            Timestamp::Text(value) => value.trim().parse().ok(),
        }
    }
}
