//! Viewer configuration, read from an optional JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration and any subset of
//! fields may be given.

use crate::assets::{AssetSource, DirectorySource, HttpSource};
use crate::scene::{TextureData, TextureFilter};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to load ground texture {path}: {source}")]
    GroundTexture {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Directory { root: PathBuf },
    Http { base_url: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Directory {
            root: PathBuf::from("models"),
        }
    }
}

/// A fixed perspective camera. The thumbnail and preview sections each fill
/// missing fields from their own preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
}

impl CameraConfig {
    pub fn preview() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 0.01,
            far: 1000.0,
            eye: [5.5, 4.0, 8.0],
            target: [0.0, 1.0, 0.0],
        }
    }

    pub fn thumbnail() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 1.0,
            far: 1000.0,
            eye: [4.0, 3.0, 5.0],
            target: [0.0, 1.0, 0.0],
        }
    }
}

/// Camera fields as written in a config file.
#[derive(Debug, Default, Deserialize)]
struct CameraOverrides {
    fov_degrees: Option<f32>,
    near: Option<f32>,
    far: Option<f32>,
    eye: Option<[f32; 3]>,
    target: Option<[f32; 3]>,
}

impl CameraOverrides {
    fn apply(self, base: CameraConfig) -> CameraConfig {
        CameraConfig {
            fov_degrees: self.fov_degrees.unwrap_or(base.fov_degrees),
            near: self.near.unwrap_or(base.near),
            far: self.far.unwrap_or(base.far),
            eye: self.eye.unwrap_or(base.eye),
            target: self.target.unwrap_or(base.target),
        }
    }
}

fn thumbnail_camera<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CameraConfig, D::Error> {
    CameraOverrides::deserialize(deserializer).map(|o| o.apply(CameraConfig::thumbnail()))
}

fn preview_camera<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CameraConfig, D::Error> {
    CameraOverrides::deserialize(deserializer).map(|o| o.apply(CameraConfig::preview()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    /// Frames a freshly attached model sits in the scene before it is captured.
    pub settle_frames: u32,
    #[serde(deserialize_with = "thumbnail_camera")]
    pub camera: CameraConfig,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 192,
            height: 128,
            settle_frames: 1,
            camera: CameraConfig::thumbnail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    #[serde(deserialize_with = "preview_camera")]
    pub camera: CameraConfig,
    /// Fraction of the viewport's pixel size the preview is rendered at.
    pub render_scale: f32,
    pub ground_texture: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::preview(),
            render_scale: 1.0,
            ground_texture: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Model Gallery".to_string(),
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub source: SourceConfig,
    pub default_format: String,
    /// 0xRRGGBB
    pub clear_color: u32,
    pub alpha_test: f32,
    pub load_workers: usize,
    pub window: WindowConfig,
    pub thumbnail: ThumbnailConfig,
    pub preview: PreviewConfig,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            default_format: "GLTF".to_string(),
            clear_color: 0xEDEADE,
            alpha_test: 0.25,
            load_workers: 2,
            window: WindowConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl GalleryConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnail.width == 0 || self.thumbnail.height == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail size must be non-zero".to_string(),
            ));
        }
        if self.thumbnail.settle_frames == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail.settle_frames must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alpha_test) {
            return Err(ConfigError::Invalid(format!(
                "alpha_test {} is outside 0..=1",
                self.alpha_test
            )));
        }
        if self.load_workers == 0 {
            return Err(ConfigError::Invalid(
                "load_workers must be at least 1".to_string(),
            ));
        }
        if !(0.05..=1.0).contains(&self.preview.render_scale) {
            return Err(ConfigError::Invalid(format!(
                "preview.render_scale {} is outside 0.05..=1",
                self.preview.render_scale
            )));
        }
        for (name, camera) in [
            ("thumbnail", &self.thumbnail.camera),
            ("preview", &self.preview.camera),
        ] {
            if camera.near <= 0.0 || camera.far <= camera.near {
                return Err(ConfigError::Invalid(format!(
                    "{name} camera needs 0 < near < far"
                )));
            }
        }
        Ok(())
    }

    pub fn open_source(&self) -> Arc<dyn AssetSource> {
        match &self.source {
            SourceConfig::Directory { root } => Arc::new(DirectorySource::new(root.clone())),
            SourceConfig::Http { base_url } => Arc::new(HttpSource::new(base_url)),
        }
    }

    /// The configured ground texture, if any. Sampled with nearest filtering.
    pub fn ground_texture(&self) -> Result<Option<TextureData>, ConfigError> {
        let Some(path) = &self.preview.ground_texture else {
            return Ok(None);
        };
        let image = image::open(path).map_err(|source| ConfigError::GroundTexture {
            path: path.clone(),
            source,
        })?;
        let mut texture = TextureData::new(image.to_rgba8());
        texture.filter = TextureFilter::Nearest;
        Ok(Some(texture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: GalleryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GalleryConfig::default());
        assert_eq!(config.thumbnail.width, 192);
        assert_eq!(config.thumbnail.camera.eye, [4.0, 3.0, 5.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let json = r#"{
            "source": { "kind": "http", "base_url": "http://localhost:8080" },
            "thumbnail": { "settle_frames": 3 }
        }"#;
        let config: GalleryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.source,
            SourceConfig::Http {
                base_url: "http://localhost:8080".to_string()
            }
        );
        assert_eq!(config.thumbnail.settle_frames, 3);
        assert_eq!(config.thumbnail.height, 128);
        assert_eq!(config.default_format, "GLTF");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = GalleryConfig::default();
        config.alpha_test = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GalleryConfig::default();
        config.preview.camera.near = 0.0;
        assert!(config.validate().is_err());

        let mut config = GalleryConfig::default();
        config.load_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn settling_needs_at_least_one_frame() {
        let config: GalleryConfig =
            serde_json::from_str(r#"{ "thumbnail": { "settle_frames": 0 } }"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_cameras_keep_their_own_presets() {
        let json = r#"{
            "thumbnail": { "camera": { "fov_degrees": 60 } },
            "preview": { "camera": { "near": 0.5 } }
        }"#;
        let config: GalleryConfig = serde_json::from_str(json).unwrap();

        let thumbnail = &config.thumbnail.camera;
        assert_eq!(thumbnail.fov_degrees, 60.0);
        assert_eq!(thumbnail.eye, [4.0, 3.0, 5.0]);
        assert_eq!(thumbnail.near, 1.0);

        let preview = &config.preview.camera;
        assert_eq!(preview.near, 0.5);
        assert_eq!(preview.eye, [5.5, 4.0, 8.0]);
        assert_eq!(preview.fov_degrees, 70.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            GalleryConfig::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            GalleryConfig::load_from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
