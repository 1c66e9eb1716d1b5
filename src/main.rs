//! Model Gallery viewer.
//!
//! Browses `<format>/<model>` directories either straight from disk or from a
//! running `gallery-server`.

use clap::Parser;
use model_gallery::config::{GalleryConfig, SourceConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "model-gallery")]
#[command(about = "Thumbnailed 3D model gallery with an orbit-camera preview")]
struct Cli {
    /// JSON config file; defaults apply for anything it leaves out
    #[arg(long)]
    config: Option<PathBuf>,

    /// Browse this directory instead of the configured source
    #[arg(long, conflicts_with = "server")]
    models: Option<PathBuf>,

    /// Browse a gallery-server, e.g. http://127.0.0.1:8080
    #[arg(long)]
    server: Option<String>,

    /// Format tab to open first
    #[arg(long)]
    format: Option<String>,
}

fn main() -> ExitCode {
    model_gallery::init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match GalleryConfig::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{}", err);
                return ExitCode::FAILURE;
            }
        },
        None => GalleryConfig::default(),
    };
    if let Some(root) = cli.models {
        config.source = SourceConfig::Directory { root };
    }
    if let Some(base_url) = cli.server {
        config.source = SourceConfig::Http { base_url };
    }
    if let Some(format) = cli.format {
        config.default_format = format;
    }
    if let Err(err) = config.validate() {
        log::error!("{}", err);
        return ExitCode::FAILURE;
    }

    match model_gallery::app::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
