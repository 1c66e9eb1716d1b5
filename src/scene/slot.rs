use super::{Model, Scene};
use crate::render::device::RenderDevice;
use crate::render::target::DrawItem;
use glam::Mat4;

/// A scene with at most one current model.
///
/// The current model is the only thing that ever changes; every change goes through
/// [`SceneSlot::replace`], which frees the previous occupant's device resources
/// before the next model is uploaded.
pub struct SceneSlot {
    label: &'static str,
    scene: Scene,
    current: Option<Model>,
}

impl SceneSlot {
    pub fn new(label: &'static str, scene: Scene) -> Self {
        Self {
            label,
            scene,
            current: None,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn current(&self) -> Option<&Model> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Releases the current model (if any), then uploads and attaches `model`.
    /// Returns the number of device resources released.
    pub fn replace(&mut self, device: &mut RenderDevice, model: Option<Model>) -> usize {
        let mut released = 0;
        if let Some(mut previous) = self.current.take() {
            released = device.release_node(&mut previous.root);
            log::debug!(
                "{} slot: disposed '{}' ({} resources)",
                self.label,
                previous.name,
                released
            );
        }

        if let Some(mut model) = model {
            device.upload_node(&mut model.root);
            log::debug!(
                "{} slot: attached '{}' ({} meshes, {} triangles)",
                self.label,
                model.name,
                model.mesh_count(),
                model.triangle_count()
            );
            self.current = Some(model);
        }
        released
    }

    pub fn clear(&mut self, device: &mut RenderDevice) -> usize {
        self.replace(device, None)
    }

    /// Uploads the scene's persistent content.
    pub fn prepare(&mut self, device: &mut RenderDevice) {
        self.scene.upload(device);
    }

    /// Drops everything this slot put on the device.
    pub fn teardown(&mut self, device: &mut RenderDevice) {
        self.clear(device);
        self.scene.release(device);
    }

    /// Ground first, then the current model.
    pub fn draw_items(&self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        let mut collect = |world: Mat4, mesh: &super::Mesh| {
            if let Some(gpu) = mesh.gpu {
                items.push(DrawItem { world, mesh: gpu });
            }
        };
        self.scene
            .ground()
            .for_each_world_mesh(Mat4::IDENTITY, &mut collect);
        if let Some(model) = &self.current {
            model.root.for_each_world_mesh(Mat4::IDENTITY, &mut collect);
        }
        items
    }
}
