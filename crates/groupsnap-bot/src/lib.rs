use std::sync::Arc;

use anyhow::{Context, Result};
use groupsnap_core::config::Config;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::analysis::WebhookAnalysisClient;
use crate::bot::{AggregationBuffer, BatchProcessor, BotContext, spawn_flush_worker};
use crate::gateway::WahaClient;
use crate::media::HttpMediaFetcher;

pub mod analysis;
pub mod bot;
pub mod gateway;
pub mod ingest;
pub mod media;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;

/// Runs the webhook relay until Ctrl-C.
///
/// # Errors
/// Returns an error if the configuration is incomplete or the listener cannot
/// be bound.
pub async fn run(config: Config) -> Result<()> {
    config.validate_for_serve()?;

    let gateway = WahaClient::new(&config.gateway);
    let fetcher = HttpMediaFetcher::new(config.buffer.download_timeout())
        .with_gateway_auth(gateway.base_url(), gateway.api_key());
    let analysis = WebhookAnalysisClient::new(&config.analysis);
    if config.analysis.webhook_url().is_none() {
        warn!("analysis.webhook_url is not set; batches will get the generic acknowledgment");
    }

    let (buffer, flushed) = AggregationBuffer::new(&config.buffer);
    let processor = Arc::new(BatchProcessor::new(
        Arc::new(gateway),
        Arc::new(fetcher),
        Arc::new(analysis),
        buffer,
        config.groups.clone(),
        config.compositor,
    ));
    let context = Arc::new(BotContext::new(
        Arc::clone(&processor),
        config.groups.clone(),
    ));

    let tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    spawn_flush_worker(flushed, processor, tracker.clone(), shutdown.clone());

    let app = server::build_router(context, &config.server);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(
        %address,
        dev_group = %config.groups.dev,
        prod_group = %config.groups.prod,
        debounce_ms = config.buffer.debounce_ms,
        "groupsnap listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {err}");
            }
            info!("shutting down");
            signal.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
    info!("in-flight batches finished");
    Ok(())
}
