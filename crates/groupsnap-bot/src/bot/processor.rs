//! Turns a flushed batch into a context request or an analysis reply.
//!
//! Every path through [`BatchProcessor::run_analysis`] ends with exactly one
//! message in the chat and a [`BatchOutcome`]; nothing here returns an error to
//! the caller.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use groupsnap_core::config::{CompositorConfig, GroupType, GroupsConfig};
use groupsnap_core::images::{Composite, CompositeError, InlineImage, composite};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::buffer::{AggregationBuffer, PendingBatch};
use crate::analysis::{AnalysisClient, AnalysisSubmission};
use crate::gateway::{ChatGateway, user_number};
use crate::media::MediaFetcher;
use crate::types::ImageRef;

pub const FAILURE_MESSAGE: &str = "❌ Error processing the images. Please try again.";

/// Result reported back to the router for one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub success: bool,
    pub message: String,
    pub group_type: Option<GroupType>,
}

impl BatchOutcome {
    fn succeeded(group_type: Option<GroupType>) -> Self {
        Self {
            success: true,
            message: "context processed and images analyzed".to_string(),
            group_type,
        }
    }

    fn failed(err: &BatchError, group_type: Option<GroupType>) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            group_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to do; the batch was already drained.
    Empty,
    /// No caption: the user was asked for context.
    ContextRequested { image_count: usize, held: bool },
    Analyzed(BatchOutcome),
}

/// Images plus the context they are analyzed with.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub batch_id: Uuid,
    pub user_id: String,
    pub group_id: String,
    pub group_type: Option<GroupType>,
    pub context_text: String,
    pub images: Vec<ImageRef>,
}

impl AnalysisRequest {
    /// Request for a batch whose captions carry the context.
    pub fn from_batch(batch: PendingBatch, group_type: Option<GroupType>) -> Self {
        Self {
            batch_id: batch.id,
            user_id: batch.user_id,
            group_id: batch.group_id,
            group_type,
            context_text: String::new(),
            images: batch.images,
        }
    }

    fn captions(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|image| image.caption.trim())
            .filter(|caption| !caption.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Error)]
enum BatchError {
    #[error("no image could be downloaded")]
    NothingFetched,
    #[error("failed to combine images: {0}")]
    Composite(#[from] CompositeError),
    #[error("composite task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub struct BatchProcessor {
    gateway: Arc<dyn ChatGateway>,
    fetcher: Arc<dyn MediaFetcher>,
    analysis: Arc<dyn AnalysisClient>,
    buffer: AggregationBuffer,
    groups: GroupsConfig,
    compositor: CompositorConfig,
}

impl BatchProcessor {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        fetcher: Arc<dyn MediaFetcher>,
        analysis: Arc<dyn AnalysisClient>,
        buffer: AggregationBuffer,
        groups: GroupsConfig,
        compositor: CompositorConfig,
    ) -> Self {
        Self {
            gateway,
            fetcher,
            analysis,
            buffer,
            groups,
            compositor,
        }
    }

    pub fn buffer(&self) -> &AggregationBuffer {
        &self.buffer
    }

    /// Handles a batch whose debounce window elapsed.
    pub async fn flush(&self, batch: PendingBatch) -> FlushOutcome {
        if batch.is_empty() {
            debug!(user_id = %batch.user_id, "flush of empty batch ignored");
            return FlushOutcome::Empty;
        }

        if !batch.has_caption() {
            return self.request_context(batch).await;
        }

        let group_type = self.groups.resolve(&batch.group_id);
        let outcome = self
            .process_with_context(AnalysisRequest::from_batch(batch, group_type))
            .await;
        FlushOutcome::Analyzed(outcome)
    }

    /// Analyzes `request` and clears whatever the buffer still holds for it.
    pub async fn process_with_context(&self, request: AnalysisRequest) -> BatchOutcome {
        info!(
            user_id = %request.user_id,
            group_id = %request.group_id,
            batch_id = %request.batch_id,
            images = request.images.len(),
            has_context = !request.context_text.trim().is_empty(),
            "processing batch"
        );
        let user_id = request.user_id.clone();
        let batch_id = request.batch_id;
        let outcome = self.run_analysis(request).await;
        self.buffer.discard(&user_id, batch_id).await;
        outcome
    }

    /// Download, composite, submit and reply.
    pub async fn run_analysis(&self, request: AnalysisRequest) -> BatchOutcome {
        let group_type = request.group_type;
        match self.analyze(&request).await {
            Ok(()) => BatchOutcome::succeeded(group_type),
            Err(err) => {
                error!(
                    user_id = %request.user_id,
                    batch_id = %request.batch_id,
                    "batch failed: {err}"
                );
                self.notify(&request.group_id, FAILURE_MESSAGE, None).await;
                BatchOutcome::failed(&err, group_type)
            }
        }
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), BatchError> {
        let fetched = self.fetch_all(&request.images).await;
        if fetched.is_empty() {
            return Err(BatchError::NothingFetched);
        }

        let options = self.compositor;
        let composite: Composite =
            tokio::task::spawn_blocking(move || composite(fetched, options)).await??;
        info!(
            batch_id = %request.batch_id,
            images = composite.image_count,
            size = composite.image.len(),
            "composite ready"
        );

        let submission = AnalysisSubmission {
            user_id: request.user_id.clone(),
            group_id: request.group_id.clone(),
            group_type: request.group_type,
            has_multiple_images: composite.has_multiple_images(),
            image_count: composite.image_count,
            composite: composite.image,
            context_text: request.context_text.clone(),
            captions: request.captions(),
            submitted_at: Utc::now(),
        };

        let verdict = match self.analysis.submit(&submission).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(batch_id = %request.batch_id, "analysis submission failed: {err}");
                None
            }
        };

        let reply = match verdict {
            Some(verdict) => {
                info!(batch_id = %request.batch_id, "verdict received");
                verdict_reply(request.group_type, &verdict)
            }
            None => {
                info!(batch_id = %request.batch_id, "no verdict, sending acknowledgment");
                acknowledgment(request.group_type)
            }
        };
        self.notify(&request.group_id, &reply, None).await;
        Ok(())
    }

    /// Fetches every image concurrently, keeping arrival order and skipping failures.
    async fn fetch_all(&self, images: &[ImageRef]) -> Vec<InlineImage> {
        let results = join_all(
            images
                .iter()
                .map(|image| self.fetcher.fetch(&image.media_url)),
        )
        .await;

        results
            .into_iter()
            .zip(images)
            .enumerate()
            .filter_map(|(index, (result, image))| match result {
                Ok(inline) => Some(inline),
                Err(err) => {
                    warn!(index, media_url = %image.media_url, "skipping image: {err}");
                    None
                }
            })
            .collect()
    }

    async fn request_context(&self, batch: PendingBatch) -> FlushOutcome {
        let image_count = batch.len();
        info!(
            user_id = %batch.user_id,
            batch_id = %batch.id,
            images = image_count,
            "no caption, asking for context"
        );
        let text = context_request(&batch.user_id, image_count);
        let user_id = batch.user_id.clone();
        let group_id = batch.group_id.clone();
        let batch_id = batch.id;

        // The batch must be parked before the user can see the request.
        let held = self.buffer.hold_for_context(batch).await;
        if !held {
            self.buffer.discard(&user_id, batch_id).await;
        }
        self.notify(&group_id, &text, Some(&user_id)).await;
        FlushOutcome::ContextRequested { image_count, held }
    }

    async fn notify(&self, chat_id: &str, text: &str, mention_user_id: Option<&str>) {
        if let Err(err) = self.gateway.send_text(chat_id, text, mention_user_id).await {
            warn!(chat_id, "failed to send message: {err}");
        }
    }
}

fn context_request(user_id: &str, image_count: usize) -> String {
    format!(
        "@{} 📝 You sent {image_count} image(s), but none has a caption.\n\n\
         Please reply with the context of these images so they can be analyzed properly.",
        user_number(user_id)
    )
}

fn verdict_reply(group_type: Option<GroupType>, verdict: &str) -> String {
    match group_type {
        Some(group_type) => format!("🤖 Image analysis ({group_type}):\n\n{verdict}"),
        None => format!("🤖 Image analysis:\n\n{verdict}"),
    }
}

fn acknowledgment(group_type: Option<GroupType>) -> String {
    let base = "🤖 Analysis complete! The images were processed successfully.";
    match group_type {
        Some(group_type) => format!("{base} ({group_type})"),
        None => base.to_string(),
    }
}
