use super::{GeometryData, MaterialData, Mesh, SceneNode, Side, TextureData, TextureFilter};
use crate::render::device::RenderDevice;
use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};

pub const GROUND_SIZE: f32 = 30.0;

/// Hemisphere sky/ground light plus one directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub sky_color: Vec3,
    pub ground_color: Vec3,
    pub hemisphere_intensity: f32,
    /// Points from the scene towards the light.
    pub sun_direction: Vec3,
    pub sun_color: Vec3,
    pub sun_intensity: f32,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            sky_color: rgb_hex(0xffffff),
            ground_color: rgb_hex(0x444444),
            hemisphere_intensity: 1.0,
            sun_direction: Vec3::new(75.0, 300.0, -75.0).normalize(),
            sun_color: Vec3::ONE,
            sun_intensity: 0.5,
        }
    }
}

pub fn rgb_hex(hex: u32) -> Vec3 {
    Vec3::new(
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    )
}

/// The persistent part of a scene: lights, clear colour and the ground plane.
pub struct Scene {
    pub lighting: Lighting,
    pub clear_color: [u8; 3],
    ground: SceneNode,
}

impl Scene {
    pub fn new(clear_color: u32, ground_texture: Option<TextureData>) -> Self {
        let texture = ground_texture.unwrap_or_else(checker_texture);
        let [_, r, g, b] = clear_color.to_be_bytes();
        Self {
            lighting: Lighting::default(),
            clear_color: [r, g, b],
            ground: ground_plane(texture),
        }
    }

    pub fn ground(&self) -> &SceneNode {
        &self.ground
    }

    pub fn upload(&mut self, device: &mut RenderDevice) {
        device.upload_node(&mut self.ground);
    }

    pub fn release(&mut self, device: &mut RenderDevice) -> usize {
        device.release_node(&mut self.ground)
    }

    /// Ready once the ground and its texture live on the device.
    pub fn is_ready(&self) -> bool {
        self.ground.meshes.iter().all(|mesh| mesh.gpu.is_some())
    }
}

/// 30x30 plane on y = 0, texture repeated 15 times per side.
fn ground_plane(texture: TextureData) -> SceneNode {
    let half = GROUND_SIZE / 2.0;
    let geometry = GeometryData {
        positions: vec![
            Vec3::new(-half, 0.0, half),
            Vec3::new(half, 0.0, half),
            Vec3::new(half, 0.0, -half),
            Vec3::new(-half, 0.0, -half),
        ],
        normals: vec![Vec3::Y; 4],
        uvs: vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    };
    let material = MaterialData {
        name: "ground".to_string(),
        texture: Some(texture),
        side: Side::Double,
        uv_scale: Vec2::splat(GROUND_SIZE / 2.0),
        ..MaterialData::default()
    };
    let mut node = SceneNode::new("ground");
    node.meshes.push(Mesh::new(geometry, material));
    node
}

fn checker_texture() -> TextureData {
    let light = Rgba([0xcc, 0xcc, 0xcc, 0xff]);
    let dark = Rgba([0x88, 0x88, 0x88, 0xff]);
    let image = RgbaImage::from_fn(2, 2, |x, y| if (x + y) % 2 == 0 { light } else { dark });
    let mut texture = TextureData::new(image);
    texture.filter = TextureFilter::Nearest;
    texture
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lighting_matches_the_gallery_look() {
        let lighting = Lighting::default();
        assert_eq!(lighting.sky_color, Vec3::ONE);
        assert!((lighting.ground_color - Vec3::splat(0x44 as f32 / 255.0)).length() < 1e-6);
        assert!((lighting.sun_direction.length() - 1.0).abs() < 1e-6);
        assert!(lighting.sun_direction.y > 0.0);
    }

    #[test]
    fn scene_is_ready_after_upload() {
        let mut device = RenderDevice::detached();
        let mut scene = Scene::new(0xEDEADE, None);
        assert_eq!(scene.clear_color, [0xED, 0xEA, 0xDE]);
        assert!(!scene.is_ready());
        scene.upload(&mut device);
        assert!(scene.is_ready());
        assert_eq!(device.stats().live_textures, 1);
        assert_eq!(scene.release(&mut device), 3);
    }
}
