use super::generation::GenerationCounter;
use super::request::{LoadCompletion, LoadTarget, RequestQueue};
use crate::config::PreviewConfig;
use crate::render::camera::{OrbitController, PerspectiveCamera};
use crate::render::device::RenderDevice;
use crate::render::target::{DrawStats, RenderTarget};
use crate::render::RenderError;
use crate::scene::{Model, Scene, SceneSlot};
use image::RgbaImage;

pub const CONTROLS_TIP: &str = "Drag with LMB to orbit, Drag with RMB to move and zoom with MMB.";

/// The on-screen scene: persistent ground and lights, one swappable model and an
/// orbit camera.
pub struct PreviewController {
    slot: SceneSlot,
    camera: PerspectiveCamera,
    orbit: OrbitController,
    home: OrbitController,
    target: RenderTarget,
    render_scale: f32,
    generations: GenerationCounter,
    pending: Option<String>,
    status: Option<String>,
}

impl PreviewController {
    pub fn new(device: &RenderDevice, scene: Scene, config: &PreviewConfig) -> Self {
        let camera = PerspectiveCamera::from_config(&config.camera, 16.0 / 9.0);
        let orbit = OrbitController::from_camera(&camera);
        Self {
            slot: SceneSlot::new("preview", scene),
            camera,
            orbit,
            home: orbit,
            target: device.create_target(1, 1),
            render_scale: config.render_scale,
            generations: GenerationCounter::default(),
            pending: None,
            status: None,
        }
    }

    pub fn prepare(&mut self, device: &mut RenderDevice) {
        self.slot.prepare(device);
    }

    pub fn teardown(&mut self, device: &mut RenderDevice) {
        self.slot.teardown(device);
    }

    /// Starts loading `model`, superseding any preview load still in flight.
    pub fn select(&mut self, requests: &mut RequestQueue, format: &str, model: &str) {
        let generation = self.generations.advance();
        requests.issue(LoadTarget::Preview, generation, format, model);
        self.pending = Some(model.to_string());
        self.status = None;
    }

    /// Applies a preview completion. Returns false if it was stale.
    pub fn on_loaded(&mut self, device: &mut RenderDevice, completion: LoadCompletion) -> bool {
        let LoadCompletion { request, result } = completion;
        if request.target != LoadTarget::Preview
            || !self.generations.is_current(request.generation)
        {
            log::debug!(
                "Dropping stale preview load for {}/{} (generation {})",
                request.format,
                request.model,
                request.generation
            );
            return false;
        }

        self.pending = None;
        match result {
            Ok(model) => {
                self.slot.replace(device, Some(model));
            }
            Err(err) => {
                log::warn!("Preview of '{}' failed: {}", request.model, err);
                self.status = Some(format!("Could not load {}: {}", request.model, err));
            }
        }
        true
    }

    /// Empties the preview and supersedes any load in flight.
    pub fn clear(&mut self, device: &mut RenderDevice) {
        self.generations.advance();
        self.pending = None;
        self.status = None;
        self.slot.clear(device);
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_model(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn current_model(&self) -> Option<&Model> {
        self.slot.current()
    }

    pub fn slot(&self) -> &SceneSlot {
        &self.slot
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// The controls tip, once the ground texture is on the device.
    pub fn tip(&self) -> Option<&'static str> {
        self.slot.scene().is_ready().then_some(CONTROLS_TIP)
    }

    pub fn orbit_mut(&mut self) -> &mut OrbitController {
        &mut self.orbit
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    /// Keeps the camera aspect and render target in step with the viewport.
    pub fn resize(&mut self, device: &RenderDevice, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.camera.set_aspect(width, height);
        let scaled = |value: u32| ((value as f32 * self.render_scale).round() as u32).max(1);
        device.resize_target(&mut self.target, scaled(width), scaled(height));
    }

    pub fn reset_camera(&mut self) {
        self.orbit = self.home;
    }

    /// Fits the orbit distance to the current model. Returns false without a model.
    pub fn frame_current_model(&mut self) -> bool {
        let Some(bounds) = self.slot.current().map(Model::bounds) else {
            return false;
        };
        if !bounds.is_valid() {
            return false;
        }
        self.orbit
            .frame_bounds_preserve_orientation(bounds.center(), bounds.extent());
        true
    }

    /// The texture the preview renders into; the UI paints it as the viewport.
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Copies the most recently rendered frame back from the device.
    pub fn frame(&self, device: &RenderDevice) -> Result<RgbaImage, RenderError> {
        device.read_back(&self.target)
    }

    pub fn render(&mut self, device: &RenderDevice) -> DrawStats {
        self.orbit.apply(&mut self.camera);
        device.draw(
            &mut self.target,
            self.camera.view_projection(),
            self.slot.scene(),
            &self.slot.draw_items(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::LoadError;
    use crate::scene::fixtures::quad_model;

    fn controller(device: &mut RenderDevice) -> PreviewController {
        let mut preview = PreviewController::new(
            device,
            Scene::new(0xEDEADE, None),
            &PreviewConfig::default(),
        );
        preview.prepare(device);
        preview
    }

    #[test]
    fn latest_selection_wins() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut preview = controller(&mut device);

        preview.select(&mut requests, "GLTF", "chair");
        preview.select(&mut requests, "GLTF", "table");
        let mut issued = requests.drain();
        let table = issued.pop().unwrap();
        let chair = issued.pop().unwrap();

        let table_model = quad_model("table");
        assert!(preview.on_loaded(
            &mut device,
            LoadCompletion {
                request: table,
                result: Ok(table_model)
            }
        ));
        let chair_model = quad_model("chair");
        assert!(!preview.on_loaded(
            &mut device,
            LoadCompletion {
                request: chair,
                result: Ok(chair_model)
            }
        ));
        assert_eq!(preview.current_model().map(|m| m.name.as_str()), Some("table"));
        assert!(!preview.is_loading());
    }

    #[test]
    fn failure_keeps_current_model_and_reports_status() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut preview = controller(&mut device);

        preview.select(&mut requests, "GLTF", "chair");
        let request = requests.drain().remove(0);
        let model = quad_model("chair");
        preview.on_loaded(&mut device, LoadCompletion { request, result: Ok(model) });

        preview.select(&mut requests, "GLTF", "lamp");
        assert!(preview.is_loading());
        let request = requests.drain().remove(0);
        preview.on_loaded(
            &mut device,
            LoadCompletion {
                result: Err(LoadError::Empty("lamp".to_string())),
                request,
            },
        );
        assert!(!preview.is_loading());
        assert_eq!(preview.current_model().map(|m| m.name.as_str()), Some("chair"));
        assert!(preview.status().is_some_and(|status| status.contains("lamp")));
    }

    #[test]
    fn clear_supersedes_in_flight_load() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut preview = controller(&mut device);
        preview.select(&mut requests, "GLTF", "chair");
        let request = requests.drain().remove(0);
        preview.clear(&mut device);
        let model = quad_model("chair");
        assert!(!preview.on_loaded(&mut device, LoadCompletion { request, result: Ok(model) }));
        assert!(preview.current_model().is_none());
    }

    #[test]
    fn renders_at_scaled_viewport_size() {
        let mut device = RenderDevice::detached();
        let mut preview = controller(&mut device);
        preview.resize(&device, 64, 32);
        assert!((preview.camera().aspect - 2.0).abs() < 1e-6);
        let stats = preview.render(&device);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(preview.target().size(), (64, 32));
        let image = preview.frame(&device).unwrap();
        assert_eq!(image.dimensions(), (64, 32));
        assert_eq!(preview.tip(), Some(CONTROLS_TIP));
    }

    #[test]
    fn framing_requires_a_model() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut preview = controller(&mut device);
        assert!(!preview.frame_current_model());
        preview.select(&mut requests, "GLTF", "chair");
        let request = requests.drain().remove(0);
        let model = quad_model("chair");
        preview.on_loaded(&mut device, LoadCompletion { request, result: Ok(model) });
        assert!(preview.frame_current_model());
    }
}
