//! Model Gallery
//!
//! A thumbnailed 3D model browser:
//! - `gallery-server` lists `<root>/<format>/<model>` directories and serves the files
//! - the viewer fetches that index, renders a thumbnail for every model of the active
//!   format off-screen, and shows the selected model in an orbit-camera viewport
//!
//! All scene state lives in [`gallery::ViewerSession`]; loads run on worker threads and
//! are matched back to the session by generation tokens.

pub mod app;
pub mod assets;
pub mod config;
pub mod gallery;
pub mod render;
pub mod scene;
pub mod server;
pub mod ui;

/// Initialise `env_logger` the same way for every binary in the crate.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
