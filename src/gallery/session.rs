use super::preview::PreviewController;
use super::request::{LoadCompletion, LoadRequest, LoadTarget, RequestQueue};
use super::thumbnails::{ModelEntry, Phase, ThumbnailPipeline, ThumbnailStatus};
use crate::assets::AssetIndex;
use crate::config::GalleryConfig;
use crate::render::device::{DeviceStats, RenderDevice};
use crate::render::target::{DrawStats, RenderTarget};
use crate::render::{save_png, RenderError};
use crate::scene::{Scene, TextureData};
use image::RgbaImage;
use std::path::Path;

/// All viewer state for one asset index: the active format, its model list, the
/// preview and thumbnail slots and the device their resources live on.
pub struct ViewerSession {
    index: AssetIndex,
    preferred_format: String,
    active_format: Option<String>,
    device: RenderDevice,
    preview: PreviewController,
    thumbnails: ThumbnailPipeline,
    requests: RequestQueue,
}

impl ViewerSession {
    pub fn new(
        index: AssetIndex,
        config: &GalleryConfig,
        ground: Option<TextureData>,
        mut device: RenderDevice,
    ) -> Self {
        let mut preview = PreviewController::new(
            &device,
            Scene::new(config.clear_color, ground.clone()),
            &config.preview,
        );
        let mut thumbnails = ThumbnailPipeline::new(
            &device,
            Scene::new(config.clear_color, ground),
            &config.thumbnail,
        );
        preview.prepare(&mut device);
        thumbnails.prepare(&mut device);

        Self {
            index,
            preferred_format: config.default_format.clone(),
            active_format: None,
            device,
            preview,
            thumbnails,
            requests: RequestQueue::default(),
        }
    }

    /// Activates the default format tab.
    pub fn start(&mut self) {
        match self.index.default_format(&self.preferred_format) {
            Some(format) => {
                let format = format.to_string();
                self.select_format(&format);
            }
            None => log::warn!("Asset index is empty, nothing to show"),
        }
    }

    pub fn index(&self) -> &AssetIndex {
        &self.index
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.index.formats()
    }

    pub fn active_format(&self) -> Option<&str> {
        self.active_format.as_deref()
    }

    /// Rebuilds the model list for `format`: the preview is emptied and a new
    /// thumbnail run starts from the first model.
    pub fn select_format(&mut self, format: &str) -> bool {
        let Some(models) = self.index.models(format).map(<[String]>::to_vec) else {
            log::warn!("Unknown format '{}'", format);
            return false;
        };
        self.preview.clear(&mut self.device);
        self.active_format = Some(format.to_string());
        self.thumbnails
            .start(&mut self.device, &mut self.requests, format, &models);
        true
    }

    /// Starts a preview load for an entry of the active list.
    pub fn select_model(&mut self, model: &str) -> bool {
        let Some(format) = self.active_format.as_deref() else {
            return false;
        };
        if !self.entries().iter().any(|entry| entry.name == model) {
            log::warn!("'{}' is not in the {} list", model, format);
            return false;
        }
        let format = format.to_string();
        self.preview.select(&mut self.requests, &format, model);
        true
    }

    /// Requests issued since the last call, for the load workers.
    pub fn take_requests(&mut self) -> Vec<LoadRequest> {
        self.requests.drain()
    }

    /// Routes a completion to its owner. Returns false if it was stale.
    pub fn handle_completion(&mut self, completion: LoadCompletion) -> bool {
        match completion.request.target {
            LoadTarget::Preview => self.preview.on_loaded(&mut self.device, completion),
            LoadTarget::Thumbnail { .. } => {
                self.thumbnails
                    .on_loaded(&mut self.device, &mut self.requests, completion)
            }
        }
    }

    /// Advances frame-driven work.
    pub fn tick(&mut self) {
        self.thumbnails.tick(&mut self.device, &mut self.requests);
    }

    pub fn loading_indicator_visible(&self) -> bool {
        self.thumbnails.is_busy() || self.preview.is_loading()
    }

    pub fn entries(&self) -> &[ModelEntry] {
        self.thumbnails.entries()
    }

    pub fn thumbnail_phase(&self) -> Phase {
        self.thumbnails.phase()
    }

    pub fn thumbnails(&self) -> &ThumbnailPipeline {
        &self.thumbnails
    }

    pub fn preview(&self) -> &PreviewController {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut PreviewController {
        &mut self.preview
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.device.stats()
    }

    pub fn resize_preview(&mut self, width: u32, height: u32) {
        self.preview.resize(&self.device, width, height);
    }

    pub fn render_preview(&mut self) -> DrawStats {
        self.preview.render(&self.device)
    }

    pub fn preview_target(&self) -> &RenderTarget {
        self.preview.target()
    }

    /// The last preview frame, read back for saving.
    pub fn preview_frame(&self) -> Result<RgbaImage, RenderError> {
        self.preview.frame(&self.device)
    }

    /// Writes every finished thumbnail of the active format to
    /// `<dir>/<format>/<model>.png`. Returns how many were written.
    pub fn export_thumbnails(&self, dir: &Path) -> Result<usize, RenderError> {
        let Some(format) = self.active_format.as_deref() else {
            return Ok(0);
        };
        let mut written = 0;
        for entry in self.entries() {
            if let ThumbnailStatus::Ready(image) = &entry.thumbnail {
                save_png(&dir.join(format).join(format!("{}.png", entry.name)), image)?;
                written += 1;
            }
        }
        log::info!("Exported {} {} thumbnails to {}", written, format, dir.display());
        Ok(written)
    }

    /// Releases every device resource, ground planes included.
    pub fn shutdown(&mut self) {
        self.preview.teardown(&mut self.device);
        self.thumbnails.teardown(&mut self.device);
        let stats = self.device.stats();
        log::info!(
            "Session closed: {} allocations, {} releases, {} live",
            stats.allocations,
            stats.releases,
            stats.live_total()
        );
    }
}
