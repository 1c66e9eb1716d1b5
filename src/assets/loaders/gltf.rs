use super::{decode_texture, fetch, LoadError, Loader};
use crate::assets::source::{percent_decode, AssetPath, AssetSource};
use crate::scene::{
    GeometryData, MaterialData, Mesh, Model, SceneNode, Side, TextureData, TextureFilter,
    TextureWrap,
};
use base64::Engine as _;
use glam::{Mat4, Vec2, Vec3, Vec4};
use gltf::material::AlphaMode;
use gltf::mesh::Mode;
use gltf::texture::{MagFilter, WrappingMode};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_NODE_DEPTH: usize = 64;

/// Binary glTF at `GLTF/<model>/<model>.glb`. Plain JSON glTF at the same path is
/// accepted too.
pub struct GltfLoader;

impl Loader for GltfLoader {
    fn format(&self) -> &str {
        "GLTF"
    }

    fn load(&self, source: &dyn AssetSource, model: &str) -> Result<Model, LoadError> {
        let path = AssetPath::primary("GLTF", model, "glb").map_err(|err| LoadError::Fetch {
            path: format!("GLTF/{model}"),
            source: err,
        })?;
        let bytes = fetch(source, &path)?;
        let gltf::Gltf { document, blob } =
            gltf::Gltf::from_slice(&bytes).map_err(|err| LoadError::Gltf {
                path: path.to_string(),
                source: err,
            })?;

        let buffers = load_buffers(source, &path, &document, blob)?;
        let scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or_else(|| LoadError::Empty(model.to_string()))?;

        let mut builder = SceneBuilder {
            source,
            path: &path,
            buffers,
            images: HashMap::new(),
        };
        let mut root = SceneNode::new(model);
        for node in scene.nodes() {
            root.children.push(builder.node(node, 0)?);
        }
        Ok(Model::new("GLTF", model, root))
    }
}

fn load_buffers(
    source: &dyn AssetSource,
    path: &AssetPath,
    document: &gltf::Document,
    mut blob: Option<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, LoadError> {
    let mut buffers = Vec::new();
    for buffer in document.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => blob.take().ok_or_else(|| unsupported(
                path,
                "buffer refers to a missing GLB binary chunk".to_string(),
            ))?,
            gltf::buffer::Source::Uri(uri) => resolve_uri(source, path, uri)?,
        };
        if data.len() < buffer.length() {
            return Err(unsupported(
                path,
                format!(
                    "buffer {} holds {} bytes, {} declared",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                ),
            ));
        }
        buffers.push(data);
    }
    Ok(buffers)
}

/// `data:` URIs are decoded in place, anything else is fetched relative to `path`.
fn resolve_uri(
    source: &dyn AssetSource,
    path: &AssetPath,
    uri: &str,
) -> Result<Vec<u8>, LoadError> {
    if let Some(data) = uri.strip_prefix("data:") {
        let (header, payload) = data
            .split_once(',')
            .ok_or_else(|| unsupported(path, "malformed data URI".to_string()))?;
        if !header.ends_with(";base64") {
            return Err(unsupported(
                path,
                format!("data URI encoding '{header}' is not base64"),
            ));
        }
        return base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|err| unsupported(path, format!("invalid base64 data URI: {err}")));
    }

    let target = path
        .join(&percent_decode(uri))
        .map_err(|err| LoadError::Fetch {
            path: uri.to_string(),
            source: err,
        })?;
    fetch(source, &target)
}

fn unsupported(path: &AssetPath, reason: String) -> LoadError {
    LoadError::UnsupportedResource {
        path: path.to_string(),
        reason,
    }
}

struct SceneBuilder<'a> {
    source: &'a dyn AssetSource,
    path: &'a AssetPath,
    buffers: Vec<Vec<u8>>,
    images: HashMap<usize, Arc<RgbaImage>>,
}

impl SceneBuilder<'_> {
    fn node(&mut self, node: gltf::Node<'_>, depth: usize) -> Result<SceneNode, LoadError> {
        if depth > MAX_NODE_DEPTH {
            return Err(unsupported(
                self.path,
                format!("node hierarchy deeper than {MAX_NODE_DEPTH}"),
            ));
        }
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node{}", node.index()));
        let mut out =
            SceneNode::new(name).with_transform(Mat4::from_cols_array_2d(&node.transform().matrix()));

        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                if let Some(mesh) = self.primitive(primitive)? {
                    out.meshes.push(mesh);
                }
            }
        }
        for child in node.children() {
            out.children.push(self.node(child, depth + 1)?);
        }
        Ok(out)
    }

    fn primitive(&mut self, primitive: gltf::Primitive<'_>) -> Result<Option<Mesh>, LoadError> {
        if primitive.mode() != Mode::Triangles {
            log::warn!(
                "{}: skipping primitive with mode {:?}",
                self.path,
                primitive.mode()
            );
            return Ok(None);
        }

        let geometry = {
            let buffers = &self.buffers;
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let Some(positions) = reader.read_positions() else {
                return Ok(None);
            };
            let positions: Vec<Vec3> = positions.map(Vec3::from).collect();
            let normals = reader
                .read_normals()
                .map(|normals| normals.map(Vec3::from).collect())
                .unwrap_or_default();
            let uvs = reader
                .read_tex_coords(0)
                .map(|uvs| uvs.into_f32().map(Vec2::from).collect())
                .unwrap_or_default();
            let indices = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };
            let mut geometry = GeometryData {
                positions,
                normals,
                uvs,
                indices,
            };
            geometry.sanitize();
            geometry
        };

        let material = self.material(primitive.material())?;
        Ok(Some(Mesh::new(geometry, material)))
    }

    fn material(&mut self, material: gltf::Material<'_>) -> Result<MaterialData, LoadError> {
        let pbr = material.pbr_metallic_roughness();
        let mut base_color = Vec4::from(pbr.base_color_factor());
        let texture = match pbr.base_color_texture() {
            Some(info) => Some(self.texture(info.texture())?),
            None => None,
        };
        let alpha_test = match material.alpha_mode() {
            AlphaMode::Mask => material.alpha_cutoff().unwrap_or(0.5),
            AlphaMode::Opaque => {
                base_color.w = 1.0;
                0.0
            }
            AlphaMode::Blend => 0.0,
        };
        Ok(MaterialData {
            name: material.name().unwrap_or("default").to_string(),
            base_color,
            texture,
            side: if material.double_sided() {
                Side::Double
            } else {
                Side::Front
            },
            alpha_test,
            uv_scale: Vec2::ONE,
        })
    }

    fn texture(&mut self, texture: gltf::Texture<'_>) -> Result<TextureData, LoadError> {
        let image = self.image(texture.source())?;
        let sampler = texture.sampler();
        let wrap = match sampler.wrap_s() {
            WrappingMode::ClampToEdge => TextureWrap::ClampToEdge,
            WrappingMode::MirroredRepeat => TextureWrap::MirroredRepeat,
            WrappingMode::Repeat => TextureWrap::Repeat,
        };
        let filter = match sampler.mag_filter() {
            Some(MagFilter::Nearest) => TextureFilter::Nearest,
            _ => TextureFilter::Linear,
        };
        Ok(TextureData { image, wrap, filter })
    }

    fn image(&mut self, image: gltf::Image<'_>) -> Result<Arc<RgbaImage>, LoadError> {
        if let Some(cached) = self.images.get(&image.index()) {
            return Ok(Arc::clone(cached));
        }

        let label = format!("{}#image{}", self.path, image.index());
        let bytes = match image.source() {
            gltf::image::Source::View { view, .. } => {
                let start = view.offset();
                let end = start + view.length();
                self.buffers
                    .get(view.buffer().index())
                    .and_then(|buffer| buffer.get(start..end))
                    .ok_or_else(|| {
                        unsupported(self.path, format!("image view out of range in {label}"))
                    })?
                    .to_vec()
            }
            gltf::image::Source::Uri { uri, .. } => resolve_uri(self.source, self.path, uri)?,
        };

        let decoded = Arc::new(decode_texture(&label, &bytes)?);
        self.images.insert(image.index(), Arc::clone(&decoded));
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::GltfLoader;
    use crate::assets::loaders::{LoadError, Loader};
    use crate::assets::{AssetIndex, MemorySource};
    use base64::Engine as _;
    use glam::{Vec3, Vec4};

    /// Three f32x3 positions followed by three u16 indices.
    fn triangle_bin() -> Vec<u8> {
        let mut bin = Vec::new();
        for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bin.extend_from_slice(&value.to_le_bytes());
        }
        for index in [0u16, 1, 2] {
            bin.extend_from_slice(&index.to_le_bytes());
        }
        bin
    }

    fn triangle_json(buffer: &str) -> String {
        format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "name": "tri", "mesh": 0, "translation": [0.0, 2.0, 0.0] }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1, "material": 0 }}] }}],
  "materials": [{{
    "name": "red",
    "pbrMetallicRoughness": {{ "baseColorFactor": [1.0, 0.0, 0.0, 0.5] }},
    "alphaMode": "MASK",
    "alphaCutoff": 0.4
  }}],
  "buffers": [{{ {buffer} "byteLength": 42 }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 6 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
      "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ]
}}"#
        )
    }

    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend_from_slice(&bin);
        out
    }

    fn check_triangle(source: &MemorySource) {
        let model = GltfLoader.load(source, "tri").unwrap();
        assert_eq!(model.format, "GLTF");
        assert_eq!(model.mesh_count(), 1);
        assert_eq!(model.triangle_count(), 1);

        let node = &model.root.children[0];
        assert_eq!(node.name, "tri");
        let mesh = &node.meshes[0];
        assert_eq!(mesh.geometry.positions[1], Vec3::X);
        assert_eq!(mesh.geometry.normals.len(), 3);
        assert_eq!(mesh.material.base_color, Vec4::new(1.0, 0.0, 0.0, 0.5));
        assert!((mesh.material.alpha_test - 0.4).abs() < 1e-6);

        let bounds = model.bounds();
        assert_eq!(bounds.min, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 3.0, 0.0));
    }

    #[test]
    fn loads_binary_glb() {
        let bytes = glb(&triangle_json(""), &triangle_bin());
        let source =
            MemorySource::new(AssetIndex::new()).with_file("GLTF/tri/tri.glb", bytes);
        check_triangle(&source);
    }

    #[test]
    fn fetches_external_buffers_relative_to_the_model() {
        let json = triangle_json(r#""uri": "tri.bin","#);
        let source = MemorySource::new(AssetIndex::new())
            .with_file("GLTF/tri/tri.glb", json)
            .with_file("GLTF/tri/tri.bin", triangle_bin());
        check_triangle(&source);
        assert_eq!(source.fetched(), vec!["GLTF/tri/tri.glb", "GLTF/tri/tri.bin"]);
    }

    #[test]
    fn decodes_embedded_data_uris() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(triangle_bin());
        let json = triangle_json(&format!(
            r#""uri": "data:application/octet-stream;base64,{encoded}","#
        ));
        let source = MemorySource::new(AssetIndex::new()).with_file("GLTF/tri/tri.glb", json);
        check_triangle(&source);
    }

    #[test]
    fn malformed_asset_is_an_error() {
        let source = MemorySource::new(AssetIndex::new())
            .with_file("GLTF/tri/tri.glb", b"glTF\x02\x00\x00\x00garbage".to_vec());
        assert!(matches!(
            GltfLoader.load(&source, "tri"),
            Err(LoadError::Gltf { .. })
        ));
    }

    #[test]
    fn missing_external_buffer_is_a_fetch_error() {
        let json = triangle_json(r#""uri": "missing.bin","#);
        let source = MemorySource::new(AssetIndex::new()).with_file("GLTF/tri/tri.glb", json);
        assert!(matches!(
            GltfLoader.load(&source, "tri"),
            Err(LoadError::Fetch { path, .. }) if path == "GLTF/tri/missing.bin"
        ));
    }
}
