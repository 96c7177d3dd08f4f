//! Media download into inline images.

use std::time::Duration;

use async_trait::async_trait;
use groupsnap_core::images::InlineImage;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    #[error("download failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("download returned status {0}")]
    Status(u16),
    #[error("download returned an empty body")]
    Empty,
}

/// Retrieves the bytes behind a media locator.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, media_url: &str) -> Result<InlineImage, FetchError>;
}

/// Downloads media over HTTP with a fixed per-request timeout.
#[derive(Clone)]
pub struct HttpMediaFetcher {
    http: reqwest::Client,
    timeout: Duration,
    gateway_auth: Option<GatewayAuth>,
}

#[derive(Clone)]
struct GatewayAuth {
    base_url: String,
    api_key: String,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            gateway_auth: None,
        }
    }

    /// Sends `X-Api-Key` for media URLs hosted by the gateway.
    #[must_use]
    pub fn with_gateway_auth(mut self, base_url: &str, api_key: Option<&str>) -> Self {
        self.gateway_auth = api_key
            .filter(|key| !key.is_empty() && !base_url.is_empty())
            .map(|key| GatewayAuth {
                base_url: base_url.to_string(),
                api_key: key.to_string(),
            });
        self
    }

    fn map_transport(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err)
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, media_url: &str) -> Result<InlineImage, FetchError> {
        let mut request = self.http.get(media_url).timeout(self.timeout);
        if let Some(auth) = self.gateway_auth.as_ref()
            && media_url.starts_with(&auth.base_url)
        {
            request = request.header("X-Api-Key", &auth.api_key);
        }

        let response = request.send().await.map_err(|err| self.map_transport(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.map_transport(err))?;
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }

        let image = InlineImage::new(content_type.as_deref(), bytes.to_vec());
        debug!(media_url, mime = image.mime_type(), size = image.len(), "media downloaded");
        Ok(image)
    }
}
