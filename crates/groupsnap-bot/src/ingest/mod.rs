use chrono::{DateTime, Utc};
use groupsnap_core::config::GroupsConfig;
use thiserror::Error;

use crate::gateway::MessagePayload;
use crate::types::{IncomingEvent, IncomingKind};

const GROUP_SUFFIX: &str = "@g.us";

/// Why an inbound message was ignored. Skips are silent: no buffer mutation,
/// no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoutingSkip {
    #[error("message has no chat id")]
    MissingChat,
    #[error("not a group conversation")]
    NotGroup,
    #[error("group is not allowed")]
    GroupNotAllowed,
    #[error("message sent by this account")]
    FromMe,
    #[error("message has no sender")]
    MissingSender,
}

/// Normalizes a gateway payload and applies the group and self-message filters.
///
/// # Errors
/// Returns the [`RoutingSkip`] reason when the message must be ignored.
pub fn parse_incoming_event(
    payload: &MessagePayload,
    groups: &GroupsConfig,
) -> Result<IncomingEvent, RoutingSkip> {
    let chat_id = payload
        .from
        .as_deref()
        .map(str::trim)
        .filter(|chat| !chat.is_empty())
        .ok_or(RoutingSkip::MissingChat)?;
    if !chat_id.ends_with(GROUP_SUFFIX) {
        return Err(RoutingSkip::NotGroup);
    }
    let group_type = groups
        .resolve(chat_id)
        .ok_or(RoutingSkip::GroupNotAllowed)?;
    if payload.from_me {
        return Err(RoutingSkip::FromMe);
    }
    let user_id = non_empty(payload.participant.as_deref())
        .or_else(|| non_empty(payload.author.as_deref()))
        .ok_or(RoutingSkip::MissingSender)?;

    Ok(IncomingEvent {
        chat_id: chat_id.to_string(),
        user_id: user_id.to_string(),
        group_type,
        kind: message_kind(payload),
        timestamp: message_time(payload),
    })
}

fn message_kind(payload: &MessagePayload) -> IncomingKind {
    let kind = if payload.has_media {
        "image"
    } else {
        payload.kind.as_deref().unwrap_or_default()
    };

    match kind {
        "image" => {
            let media = payload.media.as_ref();
            IncomingKind::Image {
                media_url: non_empty(media.and_then(|m| m.url.as_deref()))
                    .or_else(|| non_empty(payload.media_url.as_deref()))
                    .map(str::to_string),
                mime_type: non_empty(media.and_then(|m| m.mimetype.as_deref()))
                    .or_else(|| non_empty(payload.media_mime_type.as_deref()))
                    .map(str::to_string),
                caption: payload.caption.clone().unwrap_or_default(),
            }
        }
        "text" | "chat" => match payload.body.as_deref() {
            Some(body) if !body.trim().is_empty() => IncomingKind::Text {
                body: body.to_string(),
            },
            _ => IncomingKind::Other {
                kind: kind.to_string(),
            },
        },
        other => IncomingKind::Other {
            kind: other.to_string(),
        },
    }
}

fn message_time(payload: &MessagePayload) -> DateTime<Utc> {
    payload
        .timestamp
        .as_ref()
        .and_then(|ts| ts.as_unix_seconds())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
