pub mod index;
pub mod loaders;
pub mod source;

pub use index::{scan_directory, IndexError};
pub use loaders::{LoadError, Loader, LoaderRegistry};
pub use source::{AssetPath, AssetSource, DirectorySource, HttpSource, MemorySource, SourceError};

use std::collections::BTreeMap;

/// Format name -> model names, as published by the index endpoint.
///
/// Serialized as a plain JSON object: `{ "GLTF": ["chair", "lamp"], "OBJ": ["table"] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AssetIndex {
    formats: BTreeMap<String, Vec<String>>,
}

impl AssetIndex {
    pub fn new() -> Self {
        Self {
            formats: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, format: impl Into<String>, models: Vec<String>) {
        self.formats.insert(format.into(), models);
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn models(&self, format: &str) -> Option<&[String]> {
        self.formats.get(format).map(Vec::as_slice)
    }

    pub fn contains_format(&self, format: &str) -> bool {
        self.formats.contains_key(format)
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn model_count(&self) -> usize {
        self.formats.values().map(Vec::len).sum()
    }

    /// The tab that should be active on startup: `preferred` if the index has it,
    /// otherwise the first format in order.
    pub fn default_format(&self, preferred: &str) -> Option<&str> {
        if let Some((name, _)) = self.formats.get_key_value(preferred) {
            return Some(name.as_str());
        }
        self.formats().next()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(String, Vec<String>)> for AssetIndex {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        Self {
            formats: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AssetIndex;

    fn sample() -> AssetIndex {
        let mut index = AssetIndex::new();
        index.insert("GLTF", vec!["chair".to_string(), "lamp".to_string()]);
        index.insert("OBJ", vec!["table".to_string()]);
        index
    }

    #[test]
    fn serializes_as_plain_mapping() {
        let json = sample().to_json().unwrap();
        assert_eq!(json, r#"{"GLTF":["chair","lamp"],"OBJ":["table"]}"#);
        let parsed = AssetIndex::from_json(&json).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn default_format_prefers_requested_tab() {
        let index = sample();
        assert_eq!(index.default_format("OBJ"), Some("OBJ"));
        assert_eq!(index.default_format("FBX"), Some("GLTF"));
        assert_eq!(AssetIndex::new().default_format("GLTF"), None);
    }

    #[test]
    fn model_lists_keep_their_order() {
        let mut index = AssetIndex::new();
        index.insert("GLTF", vec!["zeta".to_string(), "alpha".to_string()]);
        assert_eq!(
            index.models("GLTF").unwrap(),
            &["zeta".to_string(), "alpha".to_string()]
        );
        assert_eq!(index.model_count(), 2);
        assert!(index.models("OBJ").is_none());
    }
}
