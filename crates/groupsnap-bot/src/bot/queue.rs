use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::buffer::PendingBatch;
use super::processor::{BatchProcessor, FlushOutcome};

/// Drains flushed batches and processes each one on its own task.
///
/// Batches for different users run concurrently. The worker stops taking new
/// batches once `shutdown` is cancelled; in-flight ones keep running on
/// `tracker`.
pub fn spawn_flush_worker(
    mut receiver: mpsc::UnboundedReceiver<PendingBatch>,
    processor: Arc<BatchProcessor>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    let worker_tracker = tracker.clone();
    tracker.spawn(async move {
        loop {
            let batch = tokio::select! {
                () = shutdown.cancelled() => break,
                batch = receiver.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let processor = Arc::clone(&processor);
            worker_tracker.spawn(async move {
                let user_id = batch.user_id.clone();
                let batch_id = batch.id;
                match processor.flush(batch).await {
                    FlushOutcome::Analyzed(outcome) => {
                        info!(%user_id, %batch_id, success = outcome.success, "batch finished");
                    }
                    outcome => debug!(%user_id, %batch_id, ?outcome, "batch finished"),
                }
            });
        }
        debug!("flush worker stopped");
    });
}
