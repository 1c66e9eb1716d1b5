//! Where the index and the raw asset bytes come from.
//!
//! Every model lives at `<format>/<model>/<model>.<ext>` relative to the source root;
//! sub-resources (material libraries, textures, external buffers) are resolved
//! relative to the directory of the file that references them.

use super::index::{scan_directory, IndexError};
use super::AssetIndex;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("asset {0} not found")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("invalid asset path '{0}'")]
    InvalidPath(String),
    #[error("malformed asset index: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// A validated, root-relative asset path. It can never point outside the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPath {
    segments: Vec<String>,
}

impl AssetPath {
    /// `<format>/<model>/<model>.<extension>`
    pub fn primary(format: &str, model: &str, extension: &str) -> Result<Self, SourceError> {
        for part in [format, model, extension] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(SourceError::InvalidPath(format!(
                    "{format}/{model}/{model}.{extension}"
                )));
            }
        }
        Ok(Self {
            segments: vec![
                format.to_string(),
                model.to_string(),
                format!("{model}.{extension}"),
            ],
        })
    }

    pub fn parse(path: &str) -> Result<Self, SourceError> {
        if path.starts_with('/') {
            return Err(SourceError::InvalidPath(path.to_string()));
        }
        let segments = resolve(Vec::new(), path)?;
        if segments.is_empty() {
            return Err(SourceError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Resolve `relative` against the directory containing this path.
    pub fn join(&self, relative: &str) -> Result<Self, SourceError> {
        if relative.is_empty() || relative.starts_with('/') || relative.contains(':') {
            return Err(SourceError::InvalidPath(relative.to_string()));
        }
        let base = self.segments[..self.segments.len() - 1].to_vec();
        let segments = resolve(base, relative)?;
        if segments.is_empty() {
            return Err(SourceError::InvalidPath(relative.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn extension(&self) -> Option<&str> {
        self.file_name().rsplit_once('.').map(|(_, ext)| ext)
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn resolve(mut segments: Vec<String>, relative: &str) -> Result<Vec<String>, SourceError> {
    for part in relative.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(SourceError::InvalidPath(relative.to_string()));
                }
            }
            name => segments.push(name.to_string()),
        }
    }
    Ok(segments)
}

pub trait AssetSource: Send + Sync {
    /// Human readable origin, used in logs and the window title.
    fn describe(&self) -> String;

    fn fetch_index(&self) -> Result<AssetIndex, SourceError>;

    fn fetch(&self, path: &AssetPath) -> Result<Vec<u8>, SourceError>;
}

/// Assets on the local filesystem, laid out exactly like the server's asset root.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl AssetSource for DirectorySource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch_index(&self) -> Result<AssetIndex, SourceError> {
        Ok(scan_directory(&self.root)?)
    }

    fn fetch(&self, path: &AssetPath) -> Result<Vec<u8>, SourceError> {
        let full_path = path
            .segments()
            .iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        std::fs::read(&full_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(path.to_string())
            } else {
                SourceError::Io {
                    path: full_path.display().to_string(),
                    source,
                }
            }
        })
    }
}

/// Assets served by a running `gallery-server`.
pub struct HttpSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/api/models", self.base_url)
    }

    pub fn asset_url(&self, path: &AssetPath) -> String {
        let encoded: Vec<String> = path
            .segments()
            .iter()
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}/models/{}", self.base_url, encoded.join("/"))
    }

    fn get(&self, url: &str, what: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(404, _) => SourceError::NotFound(what.to_string()),
            other => SourceError::Http {
                url: url.to_string(),
                message: other.to_string(),
            },
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|source| SourceError::Io {
                path: url.to_string(),
                source,
            })?;
        Ok(bytes)
    }
}

impl AssetSource for HttpSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch_index(&self) -> Result<AssetIndex, SourceError> {
        let url = self.index_url();
        let body = self.get(&url, "asset index")?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch(&self, path: &AssetPath) -> Result<Vec<u8>, SourceError> {
        self.get(&self.asset_url(path), &path.to_string())
    }
}

/// Everything but RFC 3986 unreserved characters is escaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Decode `%XX` escapes in a URI reference. Malformed escapes are kept verbatim.
pub fn percent_decode(uri: &str) -> String {
    percent_decode_str(uri).decode_utf8_lossy().into_owned()
}

/// In-memory asset tree. Records every fetch so load ordering can be inspected.
#[derive(Debug, Default)]
pub struct MemorySource {
    index: AssetIndex,
    files: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(index: AssetIndex) -> Self {
        Self {
            index,
            files: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_file(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), bytes.into());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl AssetSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory ({} files)", self.files.len())
    }

    fn fetch_index(&self) -> Result<AssetIndex, SourceError> {
        Ok(self.index.clone())
    }

    fn fetch(&self, path: &AssetPath) -> Result<Vec<u8>, SourceError> {
        let key = path.to_string();
        if let Ok(mut log) = self.fetched.lock() {
            log.push(key.clone());
        }
        self.files
            .get(&key)
            .cloned()
            .ok_or(SourceError::NotFound(key))
    }
}
