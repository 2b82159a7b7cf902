use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use gatesync_config::{ClientConfig, Config, ConfigLoader};

#[derive(Parser, Debug)]
#[command(name = "gatesync")]
#[command(about = "Terminal client for a chat gateway", long_about = None, version)]
pub(crate) struct Cli {
    /// Extra config file, applied after the global and project files.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    /// Gateway WebSocket URL; overrides every config source.
    #[arg(long, value_name = "URL")]
    pub(crate) url: Option<String>,
    /// Log to stderr instead of a log file.
    #[arg(long = "print-logs", default_value_t = false)]
    pub(crate) print_logs: bool,
}

/// Resolves the configuration: global file, project file, `GATESYNC_CONFIG`,
/// `--config`, environment overrides, then `--url`.
pub(crate) fn load_config(cli: &Cli, project_dir: &Path) -> Result<ClientConfig> {
    let mut loader = ConfigLoader::new();
    loader.load_global()?;
    loader.load_project(project_dir)?;
    loader.load_from_env()?;

    if let Some(path) = &cli.config {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        loader.load_from_file(path)?;
    }

    loader.apply_overrides(|key| env::var(key).ok());
    loader.merge_layer(Config {
        gateway_url: cli.url.clone(),
        ..Config::default()
    });

    loader
        .config()
        .resolve()
        .with_context(|| "invalid gatesync configuration")
}
