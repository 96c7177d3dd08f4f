use chrono::{DateTime, Utc};
use groupsnap_core::config::GroupType;

/// A normalized inbound message that passed routing checks.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub chat_id: String,
    pub user_id: String,
    pub group_type: GroupType,
    pub kind: IncomingKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingKind {
    Image {
        media_url: Option<String>,
        mime_type: Option<String>,
        caption: String,
    },
    Text {
        body: String,
    },
    Other {
        kind: String,
    },
}

/// An image announced by the gateway but not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub media_url: String,
    pub mime_type: Option<String>,
    pub caption: String,
    pub arrived_at: DateTime<Utc>,
}

impl ImageRef {
    pub fn has_caption(&self) -> bool {
        !self.caption.trim().is_empty()
    }
}
