pub mod buffer;
pub mod context;
pub mod processor;
pub mod queue;
pub mod router;

pub use buffer::{AggregationBuffer, PendingBatch};
pub use context::BotContext;
pub use processor::{AnalysisRequest, BatchOutcome, BatchProcessor, FAILURE_MESSAGE, FlushOutcome};
pub use queue::spawn_flush_worker;
pub use router::{RouteOutcome, dispatch_event};
