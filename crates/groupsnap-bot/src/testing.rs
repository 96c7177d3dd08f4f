//! Fakes for the gateway, fetcher and analysis seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use groupsnap_core::images::InlineImage;
use groupsnap_core::images::decode::encode_png;
use image::{DynamicImage, Rgba, RgbaImage};
use tokio::sync::Semaphore;

use crate::analysis::{AnalysisClient, AnalysisError, AnalysisSubmission};
use crate::gateway::{ChatGateway, GatewayError};
use crate::media::{FetchError, MediaFetcher};

pub(crate) type SentMessage = (String, String, Option<String>);

#[derive(Default)]
pub(crate) struct RecordingGateway {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingGateway {
    pub(crate) fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        mention_user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((
            chat_id.to_string(),
            text.to_string(),
            mention_user_id.map(str::to_string),
        ));
        Ok(())
    }
}

/// Serves a fixed set of URLs; anything else is a 404.
///
/// A gated fetcher blocks every download until the gate has a permit.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    media: HashMap<String, InlineImage>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeFetcher {
    pub(crate) fn with(media: &[(&str, InlineImage)]) -> Self {
        Self {
            media: media
                .iter()
                .map(|(url, image)| ((*url).to_string(), image.clone()))
                .collect(),
            gate: None,
        }
    }

    pub(crate) fn gated(media: &[(&str, InlineImage)], gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::with(media)
        }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, media_url: &str) -> Result<InlineImage, FetchError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.media
            .get(media_url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

pub(crate) struct FakeAnalysis {
    verdict: Result<Option<String>, u16>,
    submissions: Mutex<Vec<AnalysisSubmission>>,
}

impl FakeAnalysis {
    pub(crate) fn replying(verdict: Option<&str>) -> Self {
        Self {
            verdict: Ok(verdict.map(str::to_string)),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self {
            verdict: Err(status),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn submissions(&self) -> Vec<AnalysisSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysis {
    async fn submit(
        &self,
        submission: &AnalysisSubmission,
    ) -> Result<Option<String>, AnalysisError> {
        self.submissions.lock().unwrap().push(submission.clone());
        self.verdict.clone().map_err(AnalysisError::Status)
    }
}

/// Solid-color PNG.
pub(crate) fn png(width: u32, height: u32, color: [u8; 4]) -> InlineImage {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)));
    InlineImage::new(Some("image/png"), encode_png(&img).unwrap())
}
