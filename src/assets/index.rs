//! Asset index provider: `<root>/<format>/<model>` directories to an [`AssetIndex`].

use super::AssetIndex;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("asset root {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lists every format directory under `root` and, inside each, every model directory.
///
/// Plain files at either level are ignored. Names are sorted so the index does not
/// depend on the filesystem's enumeration order.
pub fn scan_directory(root: &Path) -> Result<AssetIndex, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::NotADirectory(root.to_path_buf()));
    }

    let mut index = AssetIndex::new();
    for format in subdirectory_names(root)? {
        let models = subdirectory_names(&root.join(&format))?;
        log::debug!("Indexed format '{}' with {} models", format, models.len());
        index.insert(format, models);
    }
    Ok(index)
}

fn subdirectory_names(path: &Path) -> Result<Vec<String>, IndexError> {
    let io_error = |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if !entry.file_type().map_err(io_error)?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => log::warn!("Skipping non UTF-8 directory name {:?}", raw),
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::{scan_directory, IndexError};
    use std::fs;

    #[test]
    fn lists_two_levels_of_directories() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["GLTF/lamp", "GLTF/chair", "OBJ/table"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        fs::write(root.path().join("GLTF/chair/chair.glb"), b"glTF").unwrap();
        fs::write(root.path().join("README.txt"), b"not a format").unwrap();
        fs::write(root.path().join("OBJ/notes.txt"), b"not a model").unwrap();

        let index = scan_directory(root.path()).unwrap();
        assert_eq!(index.formats().collect::<Vec<_>>(), vec!["GLTF", "OBJ"]);
        assert_eq!(
            index.models("GLTF").unwrap(),
            &["chair".to_string(), "lamp".to_string()]
        );
        assert_eq!(index.models("OBJ").unwrap(), &["table".to_string()]);
    }

    #[test]
    fn empty_format_directory_yields_empty_list() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("FBX")).unwrap();
        let index = scan_directory(root.path()).unwrap();
        assert_eq!(index.models("FBX").unwrap().len(), 0);
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(matches!(
            scan_directory(&missing),
            Err(IndexError::NotADirectory(_))
        ));
    }
}
