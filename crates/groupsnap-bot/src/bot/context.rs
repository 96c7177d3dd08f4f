use std::sync::Arc;

use groupsnap_core::config::GroupsConfig;

use super::buffer::AggregationBuffer;
use super::processor::BatchProcessor;

/// Shared state handed to the router and the webhook handlers.
pub struct BotContext {
    processor: Arc<BatchProcessor>,
    groups: GroupsConfig,
}

impl BotContext {
    pub fn new(processor: Arc<BatchProcessor>, groups: GroupsConfig) -> Self {
        Self { processor, groups }
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    pub fn buffer(&self) -> &AggregationBuffer {
        self.processor.buffer()
    }

    pub fn groups(&self) -> &GroupsConfig {
        &self.groups
    }
}
