pub mod camera;
pub mod device;
pub mod egui_overlay;
pub mod pipeline;
pub mod target;

pub use camera::{OrbitController, PerspectiveCamera};
pub use device::{DeviceStats, Gpu, RenderDevice};
pub use egui_overlay::EguiOverlay;
pub use target::{DrawItem, DrawStats, RenderTarget};

use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::window::Window;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create window surface: {0}")]
    SurfaceCreateFailed(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible graphics adapter found")]
    AdapterUnavailable,
    #[error("failed to create graphics device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
    #[error("failed to acquire frame: {0}")]
    Frame(#[from] wgpu::SurfaceError),
    #[error("failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("readback was interrupted")]
    ReadbackInterrupted,
    #[error("failed creating directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed writing image '{path}': {source}")]
    SaveImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Window surface plus the egui painter that fills it. The [`Gpu`] it creates is
/// shared with the [`RenderDevice`] that draws models off-screen.
pub struct RenderContext {
    surface: wgpu::Surface<'static>,
    gpu: Arc<Gpu>,
    config: wgpu::SurfaceConfiguration,
    overlay: EguiOverlay,
    clear_color: wgpu::Color,
    /// egui id of the preview target and the target it currently shows.
    preview: Option<(egui::TextureId, u64)>,
}

impl RenderContext {
    pub fn new(window: Arc<Window>, clear_color: u32) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window)?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or(RenderError::AdapterUnavailable)?;
        let gpu = Gpu::from_adapter(&adapter)?;

        let capabilities = surface.get_capabilities(&adapter);
        // egui writes gamma-space colours, so prefer a linear-storage format.
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or(RenderError::NoSurfaceFormat)?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
        };
        surface.configure(&gpu.device, &config);
        log::info!("Presenting with surface format {:?}", format);

        let overlay = EguiOverlay::new(&gpu.device, format);
        let [_, r, g, b] = clear_color.to_be_bytes();
        Ok(Self {
            surface,
            gpu,
            config,
            overlay,
            preview: None,
            clear_color: wgpu::Color {
                r: r as f64 / 255.0,
                g: g as f64 / 255.0,
                b: b as f64 / 255.0,
                a: 1.0,
            },
        })
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.gpu.device, &self.config);
    }

    pub fn gpu(&self) -> Arc<Gpu> {
        Arc::clone(&self.gpu)
    }

    pub fn max_texture_side(&self) -> usize {
        self.gpu.device.limits().max_texture_dimension_2d as usize
    }

    /// egui id under which `target` can be painted. The same id is reused across
    /// targets; it is rebound whenever a different target is passed in.
    pub fn preview_texture(&mut self, target: &RenderTarget) -> Option<egui::TextureId> {
        let view = target.color_view()?;
        let id = match self.preview {
            Some((id, shown)) if shown == target.id() => return Some(id),
            Some((id, _)) => {
                self.overlay.rebind_native(&self.gpu.device, view, id);
                id
            }
            None => self.overlay.register_native(&self.gpu.device, view),
        };
        self.preview = Some((id, target.id()));
        Some(id)
    }

    /// Paints one egui frame and presents it. A lost or outdated surface is
    /// reconfigured and the frame skipped.
    pub fn present(
        &mut self,
        primitives: &[egui::ClippedPrimitive],
        textures_delta: &egui::TexturesDelta,
        pixels_per_point: f32,
    ) -> Result<(), RenderError> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.gpu.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::debug!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let screen = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point,
        };
        self.overlay.paint(
            &self.gpu.device,
            &self.gpu.queue,
            &view,
            self.clear_color,
            primitives,
            textures_delta,
            &screen,
        );
        frame.present();
        Ok(())
    }
}

pub fn save_png(path: &Path, image: &RgbaImage) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| RenderError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    image::save_buffer_with_format(
        path,
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|source| RenderError::SaveImage {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::save_png;
    use image::{Rgba, RgbaImage};

    #[test]
    fn save_png_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/shots/frame.png");
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        save_png(&path, &image).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded, image);
    }
}
