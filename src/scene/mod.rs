pub mod environment;
pub mod slot;

pub use environment::{Lighting, Scene};
pub use slot::SceneSlot;

use crate::render::device::GpuMesh;
use glam::{Mat4, Vec2, Vec3, Vec4};
use image::RgbaImage;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    #[default]
    Front,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

/// Decoded texture pixels plus sampler state. Pixels are shared between
/// materials that reference the same image.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub image: Arc<RgbaImage>,
    pub wrap: TextureWrap,
    pub filter: TextureFilter,
}

impl TextureData {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            wrap: TextureWrap::default(),
            filter: TextureFilter::default(),
        }
    }
}

/// Indexed triangle list. `normals` and `uvs` are either empty or one per position.
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.len() < 3
    }

    /// Drops triangles referencing missing vertices and fills in normals/uvs that
    /// don't match the vertex count.
    pub fn sanitize(&mut self) {
        let vertex_count = self.positions.len() as u32;
        let mut kept = Vec::with_capacity(self.indices.len());
        for tri in self.indices.chunks_exact(3) {
            if tri.iter().all(|&i| i < vertex_count) {
                kept.extend_from_slice(tri);
            }
        }
        self.indices = kept;

        if self.normals.len() != self.positions.len() {
            self.compute_normals();
        }
        if !self.uvs.is_empty() && self.uvs.len() != self.positions.len() {
            self.uvs.clear();
        }
    }

    /// Area weighted vertex normals.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let face = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        self.normals = normals
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
            .collect();
    }

    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        for &position in &self.positions {
            bounds.include(position);
        }
        bounds
    }
}

#[derive(Debug, Clone)]
pub struct MaterialData {
    pub name: String,
    /// Linear RGBA multiplier.
    pub base_color: Vec4,
    pub texture: Option<TextureData>,
    pub side: Side,
    /// Fragments with alpha below this are discarded. Zero disables the test.
    pub alpha_test: f32,
    pub uv_scale: Vec2,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec4::ONE,
            texture: None,
            side: Side::Front,
            alpha_test: 0.0,
            uv_scale: Vec2::ONE,
        }
    }
}

#[derive(Debug)]
pub struct Mesh {
    pub geometry: GeometryData,
    pub material: MaterialData,
    /// Device handles, present only while the owning model is attached to a slot.
    pub gpu: Option<GpuMesh>,
}

impl Mesh {
    pub fn new(geometry: GeometryData, material: MaterialData) -> Self {
        Self {
            geometry,
            material,
            gpu: None,
        }
    }
}

#[derive(Debug)]
pub struct SceneNode {
    pub name: String,
    pub transform: Mat4,
    pub meshes: Vec<Mesh>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn for_each_mesh(&self, f: &mut dyn FnMut(&Mesh)) {
        for mesh in &self.meshes {
            f(mesh);
        }
        for child in &self.children {
            child.for_each_mesh(f);
        }
    }

    pub fn for_each_mesh_mut(&mut self, f: &mut dyn FnMut(&mut Mesh)) {
        for mesh in &mut self.meshes {
            f(mesh);
        }
        for child in &mut self.children {
            child.for_each_mesh_mut(f);
        }
    }

    /// Visits every mesh with its accumulated world transform.
    pub fn for_each_world_mesh(&self, parent: Mat4, f: &mut dyn FnMut(Mat4, &Mesh)) {
        let world = parent * self.transform;
        for mesh in &self.meshes {
            f(world, mesh);
        }
        for child in &self.children {
            child.for_each_world_mesh(world, f);
        }
    }
}

/// A loaded model: a scene-graph subtree produced by a format loader.
#[derive(Debug)]
pub struct Model {
    pub name: String,
    pub format: String,
    pub root: SceneNode,
}

impl Model {
    pub fn new(format: &str, name: &str, root: SceneNode) -> Self {
        Self {
            name: name.to_string(),
            format: format.to_string(),
            root,
        }
    }

    pub fn mesh_count(&self) -> usize {
        let mut count = 0;
        self.root.for_each_mesh(&mut |_| count += 1);
        count
    }

    pub fn triangle_count(&self) -> usize {
        let mut count = 0;
        self.root
            .for_each_mesh(&mut |mesh| count += mesh.geometry.triangle_count());
        count
    }

    pub fn has_geometry(&self) -> bool {
        let mut found = false;
        self.root
            .for_each_mesh(&mut |mesh| found |= !mesh.geometry.is_empty());
        found
    }

    /// True when every mesh currently holds device handles.
    pub fn is_uploaded(&self) -> bool {
        let mut uploaded = true;
        self.root
            .for_each_mesh(&mut |mesh| uploaded &= mesh.gpu.is_some());
        uploaded
    }

    pub fn for_each_material_mut(&mut self, f: &mut dyn FnMut(&mut MaterialData)) {
        self.root.for_each_mesh_mut(&mut |mesh| f(&mut mesh.material));
    }

    /// World-space bounds of all geometry.
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        self.root
            .for_each_world_mesh(Mat4::IDENTITY, &mut |world, mesh| {
                bounds.merge(mesh.geometry.bounds().transformed(world));
            });
        bounds
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(&mut self, other: Bounds) {
        if other.is_valid() {
            self.include(other.min);
            self.include(other.max);
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half size along each axis.
    pub fn extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn transformed(&self, matrix: Mat4) -> Bounds {
        let mut out = Bounds::EMPTY;
        if !self.is_valid() {
            return out;
        }
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.include(matrix.transform_point3(corner));
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Unit quad in the XY plane, two triangles.
    pub fn quad_geometry() -> GeometryData {
        GeometryData {
            positions: vec![
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 2.0, 0.0),
                Vec3::new(-1.0, 2.0, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            uvs: vec![
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn textured_material() -> MaterialData {
        MaterialData {
            name: "checker".to_string(),
            texture: Some(TextureData::new(RgbaImage::from_pixel(
                2,
                2,
                image::Rgba([200, 40, 40, 255]),
            ))),
            ..MaterialData::default()
        }
    }

    /// Two-level model: a root mesh and a translated child mesh.
    pub fn quad_model(name: &str) -> Model {
        let mut root = SceneNode::new(name);
        root.meshes
            .push(Mesh::new(quad_geometry(), textured_material()));
        let mut child = SceneNode::new("child")
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)));
        child
            .meshes
            .push(Mesh::new(quad_geometry(), MaterialData::default()));
        root.children.push(child);
        Model::new("GLTF", name, root)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::quad_model;
    use super::*;

    #[test]
    fn model_bounds_include_child_transforms() {
        let model = quad_model("chair");
        let bounds = model.bounds();
        assert!(bounds.is_valid());
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(model.mesh_count(), 2);
        assert_eq!(model.triangle_count(), 4);
        assert!(!model.is_uploaded());
    }

    #[test]
    fn sanitize_drops_out_of_range_triangles_and_fills_normals() {
        let mut geometry = GeometryData {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: Vec::new(),
            uvs: vec![Vec2::ZERO],
            indices: vec![0, 1, 2, 0, 1, 7],
        };
        geometry.sanitize();
        assert_eq!(geometry.indices, vec![0, 1, 2]);
        assert_eq!(geometry.normals, vec![Vec3::Z; 3]);
        assert!(geometry.uvs.is_empty());
    }

    #[test]
    fn empty_bounds_stay_empty_when_transformed() {
        let bounds = Bounds::EMPTY.transformed(Mat4::from_scale(Vec3::splat(2.0)));
        assert!(!bounds.is_valid());
    }
}
