//! Per-user image aggregation.
//!
//! Each user has at most one buffering batch. Every arriving image re-arms a
//! single debounce timer; when the timer survives a full quiet window the batch
//! is detached from the map and posted on the flush channel. Timers never touch
//! the map directly: they re-enter through [`AggregationBuffer`] and only act if
//! their epoch is still the one recorded for the batch, so a cancelled or
//! superseded timer is a no-op even if it already woke up.
//!
//! The map lock is only held for in-memory bookkeeping, never across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use groupsnap_core::config::BufferConfig;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::ImageRef;

/// Images accumulated for one user between first arrival and flush.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub id: Uuid,
    pub user_id: String,
    pub group_id: String,
    pub images: Vec<ImageRef>,
    pub first_arrival: DateTime<Utc>,
}

impl PendingBatch {
    fn new(user_id: &str, group_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            images: Vec::new(),
            first_arrival: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn has_caption(&self) -> bool {
        self.images.iter().any(ImageRef::has_caption)
    }

    /// Trimmed non-empty captions in arrival order.
    pub fn captions(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|image| image.caption.trim())
            .filter(|caption| !caption.is_empty())
            .map(str::to_string)
            .collect()
    }
}

struct Slot {
    batch: PendingBatch,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct BufferState {
    buffering: HashMap<String, Slot>,
    awaiting_context: HashMap<String, Slot>,
    next_epoch: u64,
}

impl BufferState {
    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

#[derive(Clone, Copy)]
enum TimerKind {
    Flush,
    ContextExpiry,
}

struct Inner {
    state: Mutex<BufferState>,
    debounce: Duration,
    max_images: usize,
    context_hold: Option<Duration>,
    flush_tx: mpsc::UnboundedSender<PendingBatch>,
}

/// Shared handle to the per-user buffer map.
#[derive(Clone)]
pub struct AggregationBuffer {
    inner: Arc<Inner>,
}

impl AggregationBuffer {
    /// Creates the buffer and the receiving end of its flush channel.
    pub fn new(settings: &BufferConfig) -> (Self, mpsc::UnboundedReceiver<PendingBatch>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            state: Mutex::new(BufferState::default()),
            debounce: settings.debounce(),
            max_images: settings.max_images,
            context_hold: settings.context_hold(),
            flush_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            flush_rx,
        )
    }

    /// Appends `image` to the user's batch and restarts its debounce window.
    ///
    /// Returns the batch size after the append. Only when a non-zero
    /// `max_images` cap is configured does reaching it flush immediately.
    pub async fn add_image(&self, user_id: &str, group_id: &str, image: ImageRef) -> usize {
        let mut state = self.inner.state.lock().await;
        let epoch = state.bump_epoch();
        let slot = state
            .buffering
            .entry(user_id.to_string())
            .or_insert_with(|| Slot {
                batch: PendingBatch::new(user_id, group_id),
                epoch,
                timer: None,
            });

        if slot.batch.group_id != group_id {
            warn!(
                user_id,
                batch_group = %slot.batch.group_id,
                group_id,
                "image from another group joins the open batch"
            );
        }

        slot.cancel_timer();
        slot.epoch = epoch;
        slot.batch.images.push(image);
        let count = slot.batch.len();
        info!(user_id, batch_id = %slot.batch.id, images = count, "image buffered");

        if self.inner.max_images > 0 && count >= self.inner.max_images {
            if let Some(slot) = state.buffering.remove(user_id) {
                info!(
                    user_id,
                    batch_id = %slot.batch.id,
                    images = count,
                    first_arrival = %slot.batch.first_arrival,
                    "batch full, flushing now"
                );
                self.post_flush(slot.batch);
            }
            return count;
        }

        slot.timer = Some(self.arm(user_id, epoch, self.inner.debounce, TimerKind::Flush));
        count
    }

    /// Detaches the user's buffering batch, cancelling its timer.
    ///
    /// Used when a text message arrives as context for pending images; the
    /// timer can no longer flush the same batch.
    pub async fn consume_if_pending(&self, user_id: &str) -> Option<PendingBatch> {
        let mut state = self.inner.state.lock().await;
        let mut slot = state.buffering.remove(user_id)?;
        slot.cancel_timer();
        debug!(user_id, batch_id = %slot.batch.id, "batch consumed as context target");
        (!slot.batch.is_empty()).then_some(slot.batch)
    }

    /// Clears what the buffer holds for batch `batch_id` of `user_id` without
    /// processing it. Returns `false` when nothing matched, so repeated calls
    /// are no-ops. A newer batch for the same user is left untouched.
    pub async fn discard(&self, user_id: &str, batch_id: Uuid) -> bool {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let mut removed = false;
        for map in [&mut state.buffering, &mut state.awaiting_context] {
            if map.get(user_id).is_some_and(|slot| slot.batch.id == batch_id)
                && let Some(mut slot) = map.remove(user_id)
            {
                slot.cancel_timer();
                removed = true;
            }
        }
        if removed {
            debug!(user_id, %batch_id, "batch discarded");
        }
        removed
    }

    /// Parks a captionless batch until the user replies with text.
    ///
    /// Returns `false` (and drops the batch) when holding is disabled.
    pub async fn hold_for_context(&self, batch: PendingBatch) -> bool {
        let Some(hold) = self.inner.context_hold else {
            return false;
        };

        let mut state = self.inner.state.lock().await;
        let epoch = state.bump_epoch();
        let user_id = batch.user_id.clone();
        let timer = self.arm(&user_id, epoch, hold, TimerKind::ContextExpiry);
        let previous = state.awaiting_context.insert(
            user_id.clone(),
            Slot {
                batch,
                epoch,
                timer: Some(timer),
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_timer();
            info!(user_id, batch_id = %previous.batch.id, "held batch replaced by a newer one");
        }
        true
    }

    /// Takes the batch waiting for context, if any.
    pub async fn take_awaiting_context(&self, user_id: &str) -> Option<PendingBatch> {
        let mut state = self.inner.state.lock().await;
        let mut slot = state.awaiting_context.remove(user_id)?;
        slot.cancel_timer();
        Some(slot.batch)
    }

    /// Number of images currently buffering for `user_id`.
    pub async fn pending_len(&self, user_id: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.buffering.get(user_id).map_or(0, |slot| slot.batch.len())
    }

    pub async fn is_awaiting_context(&self, user_id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state.awaiting_context.contains_key(user_id)
    }

    fn arm(&self, user_id: &str, epoch: u64, delay: Duration, kind: TimerKind) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                AggregationBuffer { inner }.on_timer(&user_id, epoch, kind).await;
            }
        })
    }

    async fn on_timer(&self, user_id: &str, epoch: u64, kind: TimerKind) {
        let mut state = self.inner.state.lock().await;
        let map = match kind {
            TimerKind::Flush => &mut state.buffering,
            TimerKind::ContextExpiry => &mut state.awaiting_context,
        };
        if map.get(user_id).is_none_or(|slot| slot.epoch != epoch) {
            debug!(user_id, epoch, "stale timer ignored");
            return;
        }
        let Some(slot) = map.remove(user_id) else {
            return;
        };
        drop(state);

        match kind {
            TimerKind::Flush => {
                info!(
                    user_id,
                    batch_id = %slot.batch.id,
                    images = slot.batch.len(),
                    first_arrival = %slot.batch.first_arrival,
                    "debounce window elapsed, flushing"
                );
                self.post_flush(slot.batch);
            }
            TimerKind::ContextExpiry => {
                info!(
                    user_id,
                    batch_id = %slot.batch.id,
                    images = slot.batch.len(),
                    "no context received, dropping held batch"
                );
            }
        }
    }

    fn post_flush(&self, batch: PendingBatch) {
        if let Err(err) = self.inner.flush_tx.send(batch) {
            warn!(batch_id = %err.0.id, "flush worker gone, batch dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::Instant;

    use super::*;

    fn settings(max_images: usize, context_hold_ms: u64) -> BufferConfig {
        BufferConfig {
            debounce_ms: 2_000,
            max_images,
            download_timeout_ms: 30_000,
            context_hold_ms,
        }
    }

    fn image(url: &str, caption: &str) -> ImageRef {
        ImageRef {
            media_url: url.to_string(),
            mime_type: Some("image/jpeg".to_string()),
            caption: caption.to_string(),
            arrived_at: Utc::now(),
        }
    }

    fn urls(batch: &PendingBatch) -> Vec<&str> {
        batch.images.iter().map(|i| i.media_url.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_after_quiet_window() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 0));
        let start = Instant::now();

        assert_eq!(buffer.add_image("u1", "g", image("a", "")).await, 1);
        let batch = rx.recv().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(2_000));
        assert_eq!(urls(&batch), vec!["a"]);
        assert_eq!(batch.group_id, "g");
        assert_eq!(buffer.pending_len("u1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_image_restarts_window() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 0));
        let start = Instant::now();

        buffer.add_image("u1", "g", image("a", "")).await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        buffer.add_image("u1", "g", image("b", "")).await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(buffer.add_image("u1", "g", image("c", "x")).await, 3);
        let last_arrival = Instant::now();

        let batch = rx.recv().await.unwrap();
        assert!(last_arrival.elapsed() >= Duration::from_millis(2_000));
        assert!(start.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(urls(&batch), vec!["a", "b", "c"]);
        assert!(batch.has_caption());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_are_independent() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        buffer.add_image("u2", "g", image("b", "")).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.user_id, "u1");
        assert_eq!(second.user_id, "u2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_cancels_timer() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        buffer.add_image("u1", "g", image("b", "")).await;
        let batch = buffer.consume_if_pending("u1").await.unwrap();
        assert_eq!(urls(&batch), vec!["a", "b"]);
        assert!(buffer.consume_if_pending("u1").await.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_batch_after_flush() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(buffer.add_image("u1", "g", image("b", "")).await, 1);
        let second = rx.recv().await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(urls(&second), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_images_flushes_immediately() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(2, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(buffer.add_image("u1", "g", image("b", "")).await, 2);

        let batch = rx.try_recv().unwrap();
        assert_eq!(urls(&batch), vec!["a", "b"]);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_settings_never_split_a_burst() {
        let (buffer, mut rx) = AggregationBuffer::new(&BufferConfig::default());

        for index in 0..12 {
            let url = format!("img-{index}");
            assert_eq!(buffer.add_image("u1", "g", image(&url, "")).await, index + 1);
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 12);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_leaves_newer_batch_alone() {
        let (buffer, _rx) = AggregationBuffer::new(&settings(10, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        let consumed = buffer.consume_if_pending("u1").await.unwrap();
        buffer.add_image("u1", "g", image("b", "")).await;

        assert!(!buffer.discard("u1", consumed.id).await);
        assert_eq!(buffer.pending_len("u1").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_removes_buffering_batch_once() {
        let (buffer, _rx) = AggregationBuffer::new(&settings(10, 0));

        buffer.add_image("u1", "g", image("a", "")).await;
        let id = {
            let state = buffer.inner.state.lock().await;
            state.buffering["u1"].batch.id
        };

        assert!(buffer.discard("u1", id).await);
        assert!(!buffer.discard("u1", id).await);
        assert_eq!(buffer.pending_len("u1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_disabled_drops_batch() {
        let (buffer, _rx) = AggregationBuffer::new(&settings(10, 0));
        let batch = PendingBatch::new("u1", "g");

        assert!(!buffer.hold_for_context(batch).await);
        assert!(!buffer.is_awaiting_context("u1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_batch_is_taken_by_text() {
        let (buffer, _rx) = AggregationBuffer::new(&settings(10, 60_000));
        let mut batch = PendingBatch::new("u1", "g");
        batch.images.push(image("a", ""));

        assert!(buffer.hold_for_context(batch).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        let held = buffer.take_awaiting_context("u1").await.unwrap();
        assert_eq!(urls(&held), vec!["a"]);
        assert!(buffer.take_awaiting_context("u1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_batch_expires() {
        let (buffer, mut rx) = AggregationBuffer::new(&settings(10, 60_000));
        let mut batch = PendingBatch::new("u1", "g");
        batch.images.push(image("a", ""));

        buffer.hold_for_context(batch).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(!buffer.is_awaiting_context("u1").await);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_captions_are_trimmed_and_ordered() {
        let mut batch = PendingBatch::new("u1", "g");
        batch.images.push(image("a", "  first "));
        batch.images.push(image("b", "   "));
        batch.images.push(image("c", "third"));

        assert_eq!(batch.captions(), vec!["first", "third"]);
        assert!(batch.has_caption());
    }
}
