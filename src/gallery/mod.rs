//! Viewer state machine: the thumbnail pipeline, the preview controller and the
//! session that owns both.

pub mod generation;
pub mod preview;
pub mod request;
pub mod session;
pub mod thumbnails;
pub mod worker;

pub use generation::{Generation, GenerationCounter};
pub use preview::{PreviewController, CONTROLS_TIP};
pub use request::{LoadCompletion, LoadRequest, LoadTarget, RequestQueue};
pub use session::ViewerSession;
pub use thumbnails::{ModelEntry, Phase, ThumbnailPipeline, ThumbnailStatus};
pub use worker::LoadWorker;
