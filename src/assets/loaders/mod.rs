//! Format loaders: one [`Loader`] per format, looked up by format name.

pub mod gltf;
pub mod obj;

pub use self::gltf::GltfLoader;
pub use self::obj::ObjLoader;

use super::source::{AssetPath, AssetSource, SourceError};
use crate::scene::{Model, Side};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no loader registered for format '{0}'")]
    UnsupportedFormat(String),
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: SourceError,
    },
    #[error("malformed glTF asset {path}: {source}")]
    Gltf {
        path: String,
        #[source]
        source: ::gltf::Error,
    },
    #[error("malformed OBJ asset {path}: {source}")]
    Obj {
        path: String,
        #[source]
        source: tobj::LoadError,
    },
    #[error("failed to decode texture {path}: {source}")]
    Texture {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported resource in {path}: {reason}")]
    UnsupportedResource { path: String, reason: String },
    #[error("model '{0}' has no renderable geometry")]
    Empty(String),
}

/// Turns a model name into a CPU-side scene graph for one format.
pub trait Loader: Send + Sync {
    fn format(&self) -> &str;

    fn load(&self, source: &dyn AssetSource, model: &str) -> Result<Model, LoadError>;
}

pub struct LoaderRegistry {
    source: Arc<dyn AssetSource>,
    loaders: HashMap<String, Box<dyn Loader>>,
    alpha_test: f32,
}

impl LoaderRegistry {
    pub fn new(source: Arc<dyn AssetSource>, alpha_test: f32) -> Self {
        Self {
            source,
            loaders: HashMap::new(),
            alpha_test,
        }
    }

    /// Registry with the GLTF and OBJ loaders.
    pub fn with_default_loaders(source: Arc<dyn AssetSource>, alpha_test: f32) -> Self {
        let mut registry = Self::new(source, alpha_test);
        registry.register(Box::new(GltfLoader));
        registry.register(Box::new(ObjLoader));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn Loader>) {
        self.loaders.insert(loader.format().to_string(), loader);
    }

    pub fn supports(&self, format: &str) -> bool {
        self.loaders.contains_key(format)
    }

    pub fn source(&self) -> &Arc<dyn AssetSource> {
        &self.source
    }

    /// Loads `model` with the loader registered for `format`, then makes every
    /// material double-sided with the registry's alpha-test threshold.
    pub fn load(&self, format: &str, model: &str) -> Result<Model, LoadError> {
        let loader = self
            .loaders
            .get(format)
            .ok_or_else(|| LoadError::UnsupportedFormat(format.to_string()))?;

        let mut loaded = loader.load(self.source.as_ref(), model)?;
        if !loaded.has_geometry() {
            return Err(LoadError::Empty(model.to_string()));
        }
        normalize_materials(&mut loaded, self.alpha_test);
        log::info!(
            "Loaded {} model '{}' ({} meshes, {} triangles)",
            format,
            model,
            loaded.mesh_count(),
            loaded.triangle_count()
        );
        Ok(loaded)
    }
}

pub fn normalize_materials(model: &mut Model, alpha_test: f32) {
    model.for_each_material_mut(&mut |material| {
        material.side = Side::Double;
        material.alpha_test = alpha_test;
    });
}

pub(crate) fn fetch(source: &dyn AssetSource, path: &AssetPath) -> Result<Vec<u8>, LoadError> {
    source.fetch(path).map_err(|source| LoadError::Fetch {
        path: path.to_string(),
        source,
    })
}

pub(crate) fn decode_texture(label: &str, bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|source| LoadError::Texture {
            path: label.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetIndex, MemorySource};
    use crate::scene::fixtures::quad_model;
    use crate::scene::SceneNode;

    struct FakeLoader {
        empty: bool,
    }

    impl Loader for FakeLoader {
        fn format(&self) -> &str {
            "FAKE"
        }

        fn load(&self, _source: &dyn AssetSource, model: &str) -> Result<Model, LoadError> {
            if self.empty {
                Ok(Model::new("FAKE", model, SceneNode::new(model)))
            } else {
                Ok(quad_model(model))
            }
        }
    }

    fn registry(empty: bool) -> LoaderRegistry {
        let source = Arc::new(MemorySource::new(AssetIndex::new()));
        let mut registry = LoaderRegistry::with_default_loaders(source, 0.25);
        registry.register(Box::new(FakeLoader { empty }));
        registry
    }

    #[test]
    fn unknown_format_fails_fast() {
        let registry = registry(false);
        assert!(registry.supports("GLTF"));
        assert!(registry.supports("OBJ"));
        assert!(matches!(
            registry.load("FBX", "chair"),
            Err(LoadError::UnsupportedFormat(format)) if format == "FBX"
        ));
    }

    #[test]
    fn loaded_materials_are_normalized() {
        let model = registry(false).load("FAKE", "chair").unwrap();
        let mut seen = 0;
        model.root.for_each_mesh(&mut |mesh| {
            assert_eq!(mesh.material.side, Side::Double);
            assert_eq!(mesh.material.alpha_test, 0.25);
            seen += 1;
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn models_without_geometry_are_rejected() {
        assert!(matches!(
            registry(true).load("FAKE", "ghost"),
            Err(LoadError::Empty(name)) if name == "ghost"
        ));
    }

    #[test]
    fn missing_asset_reports_fetch_error() {
        assert!(matches!(
            registry(false).load("GLTF", "chair"),
            Err(LoadError::Fetch { path, .. }) if path == "GLTF/chair/chair.glb"
        ));
    }
}
