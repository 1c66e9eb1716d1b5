//! Serves a model directory for `model-gallery --server`.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "gallery-server")]
#[command(about = "Serve a <format>/<model> directory tree and its index over HTTP")]
struct Cli {
    /// Asset root holding one directory per format
    #[arg(long, default_value = "models")]
    root: PathBuf,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> ExitCode {
    model_gallery::init_logging();
    let cli = Cli::parse();

    match model_gallery::server::serve(cli.root, cli.addr).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
