use super::{decode_texture, fetch, LoadError, Loader};
use crate::assets::source::{AssetPath, AssetSource};
use crate::scene::{GeometryData, MaterialData, Mesh, Model, SceneNode, TextureData};
use glam::{Vec2, Vec3, Vec4};
use std::collections::HashMap;
use std::io::Cursor;

/// Wavefront OBJ with its material library:
/// `OBJ/<model>/<model>.mtl` is fetched and parsed first, then `OBJ/<model>/<model>.obj`.
pub struct ObjLoader;

impl Loader for ObjLoader {
    fn format(&self) -> &str {
        "OBJ"
    }

    fn load(&self, source: &dyn AssetSource, model: &str) -> Result<Model, LoadError> {
        let primary = |ext| {
            AssetPath::primary("OBJ", model, ext).map_err(|err| LoadError::Fetch {
                path: format!("OBJ/{model}"),
                source: err,
            })
        };
        let mtl_path = primary("mtl")?;
        let obj_path = primary("obj")?;

        let mtl_bytes = fetch(source, &mtl_path)?;
        let preloaded =
            tobj::load_mtl_buf(&mut Cursor::new(&mtl_bytes)).map_err(|err| LoadError::Obj {
                path: mtl_path.to_string(),
                source: err,
            })?;

        let obj_bytes = fetch(source, &obj_path)?;
        let options = tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        };
        let (models, materials) =
            tobj::load_obj_buf(&mut Cursor::new(&obj_bytes), &options, |reference| {
                let reference = reference.to_string_lossy();
                let target = obj_path
                    .join(&reference)
                    .map_err(|_| tobj::LoadError::OpenFileFailed)?;
                if target == mtl_path {
                    return Ok(preloaded.clone());
                }
                let bytes = source
                    .fetch(&target)
                    .map_err(|_| tobj::LoadError::OpenFileFailed)?;
                tobj::load_mtl_buf(&mut Cursor::new(bytes))
            })
            .map_err(|err| LoadError::Obj {
                path: obj_path.to_string(),
                source: err,
            })?;

        let materials = match materials {
            Ok(materials) => materials,
            Err(err) => {
                log::warn!(
                    "{}: material library reference failed ({}), using {}",
                    obj_path,
                    err,
                    mtl_path
                );
                preloaded.0
            }
        };

        let mut textures = TextureCache::default();
        let materials: Vec<MaterialData> = materials
            .iter()
            .map(|material| convert_material(material, source, &obj_path, &mut textures))
            .collect();

        let mut root = SceneNode::new(model);
        for (index, obj_model) in models.into_iter().enumerate() {
            let geometry = convert_mesh(&obj_model.mesh);
            if geometry.is_empty() {
                continue;
            }
            let material = obj_model
                .mesh
                .material_id
                .and_then(|id| materials.get(id))
                .cloned()
                .unwrap_or_default();
            let name = if obj_model.name.is_empty() {
                format!("object{index}")
            } else {
                obj_model.name
            };
            let mut node = SceneNode::new(name);
            node.meshes.push(Mesh::new(geometry, material));
            root.children.push(node);
        }
        Ok(Model::new("OBJ", model, root))
    }
}

fn convert_mesh(mesh: &tobj::Mesh) -> GeometryData {
    let positions = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();
    let normals = mesh
        .normals
        .chunks_exact(3)
        .map(|n| Vec3::new(n[0], n[1], n[2]))
        .collect();
    // OBJ texture space starts at the bottom row.
    let uvs = mesh
        .texcoords
        .chunks_exact(2)
        .map(|t| Vec2::new(t[0], 1.0 - t[1]))
        .collect();
    let mut geometry = GeometryData {
        positions,
        normals,
        uvs,
        indices: mesh.indices.clone(),
    };
    geometry.sanitize();
    geometry
}

/// Decoded `map_Kd` images keyed by resolved path. `None` marks a texture that
/// failed and should not be retried.
#[derive(Default)]
struct TextureCache {
    entries: HashMap<AssetPath, Option<TextureData>>,
}

fn convert_material(
    material: &tobj::Material,
    source: &dyn AssetSource,
    obj_path: &AssetPath,
    textures: &mut TextureCache,
) -> MaterialData {
    let diffuse = material.diffuse.unwrap_or([1.0, 1.0, 1.0]);
    let alpha = material.dissolve.unwrap_or(1.0);
    let texture = material
        .diffuse_texture
        .as_deref()
        .and_then(texture_file)
        .and_then(|file| load_texture(file, source, obj_path, textures));

    MaterialData {
        name: material.name.clone(),
        base_color: Vec4::new(diffuse[0], diffuse[1], diffuse[2], alpha),
        texture,
        ..MaterialData::default()
    }
}

/// `map_Kd -s 2 2 1 wood.png` names its file last.
fn texture_file(statement: &str) -> Option<&str> {
    statement.split_whitespace().last()
}

/// Missing or undecodable textures are logged and the material renders untextured.
fn load_texture(
    file: &str,
    source: &dyn AssetSource,
    obj_path: &AssetPath,
    textures: &mut TextureCache,
) -> Option<TextureData> {
    let path = match obj_path.join(file) {
        Ok(path) => path,
        Err(err) => {
            log::warn!("{}: ignoring texture '{}': {}", obj_path, file, err);
            return None;
        }
    };
    if let Some(cached) = textures.entries.get(&path) {
        return cached.clone();
    }

    let texture = fetch(source, &path)
        .and_then(|bytes| decode_texture(&path.to_string(), &bytes))
        .map(TextureData::new);
    let texture = match texture {
        Ok(texture) => Some(texture),
        Err(err) => {
            log::warn!("{}: {}", obj_path, err);
            None
        }
    };
    textures.entries.insert(path, texture.clone());
    texture
}
