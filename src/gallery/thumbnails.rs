//! Sequential off-screen thumbnail capture.
//!
//! One model of the active format is in flight at a time, in list order:
//! load, attach to the off-screen slot, let it settle, capture, advance. A run is
//! tagged with a generation; completions from an older run are dropped.

use super::generation::{Generation, GenerationCounter};
use super::request::{LoadCompletion, LoadTarget, RequestQueue};
use crate::config::ThumbnailConfig;
use crate::render::camera::PerspectiveCamera;
use crate::render::device::RenderDevice;
use crate::render::target::RenderTarget;
use crate::scene::{Scene, SceneSlot};
use image::RgbaImage;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ThumbnailStatus {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub name: String,
    pub thumbnail: ThumbnailStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Settling { frames_left: u32 },
    Done,
}

#[derive(Debug, Default)]
pub struct ThumbnailState {
    pub format: String,
    pub index: usize,
    pub entries: Vec<ModelEntry>,
}

pub struct ThumbnailPipeline {
    slot: SceneSlot,
    camera: PerspectiveCamera,
    target: RenderTarget,
    settle_frames: u32,
    generations: GenerationCounter,
    state: ThumbnailState,
    phase: Phase,
}

impl ThumbnailPipeline {
    /// `settle_frames` below one is raised to one, so a model is never captured in
    /// the step that attached it.
    pub fn new(device: &RenderDevice, scene: Scene, config: &ThumbnailConfig) -> Self {
        let aspect = config.width as f32 / config.height as f32;
        Self {
            slot: SceneSlot::new("thumbnail", scene),
            camera: PerspectiveCamera::from_config(&config.camera, aspect),
            target: device.create_target(config.width, config.height),
            settle_frames: config.settle_frames.max(1),
            generations: GenerationCounter::default(),
            state: ThumbnailState::default(),
            phase: Phase::Idle,
        }
    }

    pub fn prepare(&mut self, device: &mut RenderDevice) {
        self.slot.prepare(device);
    }

    pub fn teardown(&mut self, device: &mut RenderDevice) {
        self.slot.teardown(device);
    }

    pub fn state(&self) -> &ThumbnailState {
        &self.state
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.state.entries
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generations.current()
    }

    pub fn slot(&self) -> &SceneSlot {
        &self.slot
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Settling { .. })
    }

    /// Rebuilds the entry list and starts a new run from the first model.
    pub fn start(
        &mut self,
        device: &mut RenderDevice,
        requests: &mut RequestQueue,
        format: &str,
        models: &[String],
    ) {
        let generation = self.generations.advance();
        self.slot.clear(device);
        self.state = ThumbnailState {
            format: format.to_string(),
            index: 0,
            entries: models
                .iter()
                .map(|name| ModelEntry {
                    name: name.clone(),
                    thumbnail: ThumbnailStatus::Pending,
                })
                .collect(),
        };
        log::info!(
            "Thumbnail run {} for {}: {} models",
            generation,
            format,
            models.len()
        );

        if self.state.entries.is_empty() {
            self.finish(device);
        } else {
            self.request_current(requests);
        }
    }

    /// Applies a thumbnail completion. Returns false if it was stale.
    pub fn on_loaded(
        &mut self,
        device: &mut RenderDevice,
        requests: &mut RequestQueue,
        completion: LoadCompletion,
    ) -> bool {
        let LoadCompletion { request, result } = completion;
        let LoadTarget::Thumbnail { index } = request.target else {
            return false;
        };
        if !self.generations.is_current(request.generation)
            || self.phase != Phase::Loading
            || index != self.state.index
        {
            log::debug!(
                "Dropping stale thumbnail load for {}/{} (generation {})",
                request.format,
                request.model,
                request.generation
            );
            return false;
        }

        match result {
            Ok(model) => {
                self.slot.replace(device, Some(model));
                self.phase = Phase::Settling {
                    frames_left: self.settle_frames,
                };
            }
            Err(err) => {
                log::warn!("Thumbnail for '{}' failed: {}", request.model, err);
                if let Some(entry) = self.state.entries.get_mut(index) {
                    entry.thumbnail = ThumbnailStatus::Failed(err.to_string());
                }
                self.advance(device, requests);
            }
        }
        true
    }

    /// One frame step. Captures once the attached model has settled.
    pub fn tick(&mut self, device: &mut RenderDevice, requests: &mut RequestQueue) {
        let Phase::Settling { frames_left } = self.phase else {
            return;
        };
        if frames_left > 0 {
            self.phase = Phase::Settling {
                frames_left: frames_left - 1,
            };
            return;
        }
        self.capture(device);
        self.advance(device, requests);
    }

    fn capture(&mut self, device: &RenderDevice) {
        device.draw(
            &mut self.target,
            self.camera.view_projection(),
            self.slot.scene(),
            &self.slot.draw_items(),
        );
        let captured = device.read_back(&self.target);
        let index = self.state.index;
        let Some(entry) = self.state.entries.get_mut(index) else {
            return;
        };
        entry.thumbnail = match captured {
            Ok(image) => {
                log::debug!("Captured thumbnail for '{}'", entry.name);
                ThumbnailStatus::Ready(Arc::new(image))
            }
            Err(err) => {
                log::warn!("Thumbnail readback for '{}' failed: {}", entry.name, err);
                ThumbnailStatus::Failed(err.to_string())
            }
        };
    }

    fn advance(&mut self, device: &mut RenderDevice, requests: &mut RequestQueue) {
        self.state.index += 1;
        if self.state.index < self.state.entries.len() {
            self.request_current(requests);
        } else {
            self.finish(device);
        }
    }

    fn request_current(&mut self, requests: &mut RequestQueue) {
        let index = self.state.index;
        let model = &self.state.entries[index].name;
        requests.issue(
            LoadTarget::Thumbnail { index },
            self.generations.current(),
            &self.state.format,
            model,
        );
        self.phase = Phase::Loading;
    }

    fn finish(&mut self, device: &mut RenderDevice) {
        self.slot.clear(device);
        self.phase = Phase::Done;
        let failed = self
            .state
            .entries
            .iter()
            .filter(|entry| matches!(entry.thumbnail, ThumbnailStatus::Failed(_)))
            .count();
        log::info!(
            "Thumbnails for {} done ({} models, {} failed)",
            self.state.format,
            self.state.entries.len(),
            failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::LoadError;
    use crate::gallery::request::LoadRequest;
    use crate::scene::fixtures::quad_model;

    fn pipeline(device: &mut RenderDevice, settle_frames: u32) -> ThumbnailPipeline {
        let config = ThumbnailConfig {
            settle_frames,
            ..ThumbnailConfig::default()
        };
        let mut pipeline = ThumbnailPipeline::new(device, Scene::new(0xEDEADE, None), &config);
        pipeline.prepare(device);
        pipeline
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn succeed(request: LoadRequest) -> LoadCompletion {
        let model = quad_model(&request.model);
        LoadCompletion {
            request,
            result: Ok(model),
        }
    }

    #[test]
    fn settles_before_capturing() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 2);
        pipeline.start(&mut device, &mut requests, "GLTF", &names(&["chair"]));

        let request = requests.drain().remove(0);
        assert!(pipeline.on_loaded(&mut device, &mut requests, succeed(request)));
        assert!(pipeline.slot().current().is_some());

        pipeline.tick(&mut device, &mut requests);
        pipeline.tick(&mut device, &mut requests);
        assert!(matches!(pipeline.entries()[0].thumbnail, ThumbnailStatus::Pending));
        pipeline.tick(&mut device, &mut requests);

        let ThumbnailStatus::Ready(image) = &pipeline.entries()[0].thumbnail else {
            panic!("thumbnail not captured");
        };
        assert_eq!(image.dimensions(), (192, 128));
        assert_eq!(pipeline.phase(), Phase::Done);
        assert!(pipeline.slot().is_empty());
    }

    #[test]
    fn zero_settle_frames_still_waits_one_tick() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 0);
        pipeline.start(&mut device, &mut requests, "GLTF", &names(&["chair"]));

        let request = requests.drain().remove(0);
        pipeline.on_loaded(&mut device, &mut requests, succeed(request));
        assert_eq!(pipeline.phase(), Phase::Settling { frames_left: 1 });

        pipeline.tick(&mut device, &mut requests);
        assert!(matches!(pipeline.entries()[0].thumbnail, ThumbnailStatus::Pending));
        pipeline.tick(&mut device, &mut requests);
        assert!(matches!(pipeline.entries()[0].thumbnail, ThumbnailStatus::Ready(_)));
    }

    #[test]
    fn empty_list_finishes_immediately() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 1);
        pipeline.start(&mut device, &mut requests, "FBX", &[]);
        assert_eq!(pipeline.phase(), Phase::Done);
        assert!(!pipeline.is_busy());
        assert!(requests.is_empty());
    }

    #[test]
    fn failure_marks_entry_and_moves_on() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 0);
        pipeline.start(&mut device, &mut requests, "GLTF", &names(&["chair", "lamp"]));

        let request = requests.drain().remove(0);
        let failed = LoadCompletion {
            result: Err(LoadError::Empty(request.model.clone())),
            request,
        };
        assert!(pipeline.on_loaded(&mut device, &mut requests, failed));
        assert!(matches!(pipeline.entries()[0].thumbnail, ThumbnailStatus::Failed(_)));

        let next = requests.drain();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].model, "lamp");
        assert_eq!(next[0].target, LoadTarget::Thumbnail { index: 1 });
    }

    #[test]
    fn restart_ignores_previous_generation() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 0);
        pipeline.start(&mut device, &mut requests, "GLTF", &names(&["chair"]));
        let old = requests.drain().remove(0);

        pipeline.start(&mut device, &mut requests, "OBJ", &names(&["table"]));
        assert!(!pipeline.on_loaded(&mut device, &mut requests, succeed(old)));
        assert!(pipeline.slot().is_empty());
        assert_eq!(pipeline.state().format, "OBJ");
        assert!(matches!(pipeline.entries()[0].thumbnail, ThumbnailStatus::Pending));
    }

    #[test]
    fn resources_are_released_when_done() {
        let mut device = RenderDevice::detached();
        let mut requests = RequestQueue::default();
        let mut pipeline = pipeline(&mut device, 0);
        let baseline = device.stats().live_total();
        pipeline.start(&mut device, &mut requests, "GLTF", &names(&["a", "b", "c"]));
        while let Some(request) = requests.drain().pop() {
            pipeline.on_loaded(&mut device, &mut requests, succeed(request));
            while matches!(pipeline.phase(), Phase::Settling { .. }) {
                pipeline.tick(&mut device, &mut requests);
            }
        }
        assert_eq!(pipeline.phase(), Phase::Done);
        assert!(pipeline
            .entries()
            .iter()
            .all(|entry| matches!(entry.thumbnail, ThumbnailStatus::Ready(_))));
        assert_eq!(device.stats().live_total(), baseline);
    }
}
