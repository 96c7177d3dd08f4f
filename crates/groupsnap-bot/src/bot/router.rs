use groupsnap_core::config::GroupType;
use serde::Serialize;
use tracing::{info, warn};

use super::buffer::PendingBatch;
use super::context::BotContext;
use super::processor::{AnalysisRequest, BatchOutcome};
use crate::types::{ImageRef, IncomingEvent, IncomingKind};

/// What the router did with an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RouteOutcome {
    ImageBuffered(ImageBuffered),
    ContextProcessed(BatchOutcome),
    Processed(MessageProcessed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuffered {
    pub success: bool,
    pub message: String,
    pub group_type: GroupType,
    pub user_id: String,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProcessed {
    pub success: bool,
    pub message: String,
    pub group_type: GroupType,
}

impl RouteOutcome {
    fn processed(group_type: GroupType) -> Self {
        RouteOutcome::Processed(MessageProcessed {
            success: true,
            message: "message processed".to_string(),
            group_type,
        })
    }
}

/// Routes an accepted message into the buffer or the processor.
///
/// Images are buffered. A text message from a user with pending images is
/// their context and triggers analysis right away; any other message is only
/// acknowledged.
pub async fn dispatch_event(context: &BotContext, event: IncomingEvent) -> RouteOutcome {
    let IncomingEvent {
        chat_id,
        user_id,
        group_type,
        kind,
        timestamp,
    } = event;

    match kind {
        IncomingKind::Image {
            media_url: Some(media_url),
            mime_type,
            caption,
        } => {
            let image = ImageRef {
                media_url,
                mime_type,
                caption,
                arrived_at: timestamp,
            };
            let image_count = context.buffer().add_image(&user_id, &chat_id, image).await;
            RouteOutcome::ImageBuffered(ImageBuffered {
                success: true,
                message: "image added to buffer".to_string(),
                group_type,
                user_id,
                image_count,
            })
        }
        IncomingKind::Image {
            media_url: None, ..
        } => {
            warn!(%user_id, %chat_id, "image message without media url");
            RouteOutcome::processed(group_type)
        }
        IncomingKind::Text { body } => {
            let Some(batch) = pending_for_context(context, &user_id).await else {
                return RouteOutcome::processed(group_type);
            };
            info!(%user_id, batch_id = %batch.id, images = batch.len(), "text received as context");
            let request = AnalysisRequest {
                batch_id: batch.id,
                user_id,
                group_id: chat_id,
                group_type: Some(group_type),
                context_text: body,
                images: batch.images,
            };
            RouteOutcome::ContextProcessed(context.processor().process_with_context(request).await)
        }
        IncomingKind::Other { .. } => RouteOutcome::processed(group_type),
    }
}

async fn pending_for_context(context: &BotContext, user_id: &str) -> Option<PendingBatch> {
    match context.buffer().consume_if_pending(user_id).await {
        Some(batch) => Some(batch),
        None => context.buffer().take_awaiting_context(user_id).await,
    }
}
