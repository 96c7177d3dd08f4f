use std::path::Path;

use anyhow::Result;
use groupsnap_core::config::Config;
use tracing::info;

pub async fn run(config: Config, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        info!(path = %config_path.display(), "config loaded");
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
    }
    groupsnap_bot::run(config).await
}
