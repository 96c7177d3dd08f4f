//! CLI entry and dispatch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use groupsnap_core::config::{self, Config};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "groupsnap")]
#[command(version)]
#[command(about = "Group chat image batching relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $GROUPSNAP_CONFIG, then ./groupsnap.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Stack local images into one composite
    Composite {
        #[arg(value_name = "IMAGE", required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Gap between images (defaults to compositor.padding)
        #[arg(long)]
        padding: Option<u32>,

        /// JPEG quality 1-100 (defaults to compositor.jpeg_quality)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the resolved config path
    Path,
    /// Write a commented default config
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::paths::config_path(cli.config.as_deref());

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path(&config_path);
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(&config_path),
        },
        Commands::Composite {
            inputs,
            output,
            padding,
            quality,
        } => {
            let config = load_config(&config_path)?;
            let mut options = config.compositor;
            if let Some(padding) = padding {
                options.padding = padding;
            }
            if let Some(quality) = quality {
                options.jpeg_quality = quality;
            }
            commands::composite::run(&inputs, &output, options)
        }
        Commands::Serve { host, port } => {
            let mut config = load_config(&config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let _guard = logging::init_tracing(&config.logging)?;

            let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
            rt.block_on(commands::serve::run(config, &config_path))
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load_from(path).context("load config")?;
    config.apply_env_overrides();
    Ok(config)
}
