//! Loading `.pl0` programs from a directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;

pub const SOURCE_EXTENSION: &str = "pl0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the root that was walked.
    pub path: PathBuf,
    pub contents: String,
}

/// Every `*.pl0` file under `root`, sorted by path.
pub fn load_sources(root: impl AsRef<Path>) -> Result<Vec<SourceFile>, CoreError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(CoreError::MissingSourceRoot(root.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            let contents = fs::read_to_string(path)?;
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            files.push(SourceFile {
                path: relative,
                contents,
            });
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_nested_sources_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let nested = root.join("lessons");
        fs::create_dir_all(&nested).expect("create nested dir");
        fs::write(root.join("b.pl0"), "var b;").expect("write b");
        fs::write(nested.join("a.pl0"), "var a;").expect("write a");
        fs::write(root.join("notes.txt"), "not a program").expect("write notes");

        let files = load_sources(root).expect("load");
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("b.pl0"), PathBuf::from("lessons").join("a.pl0")]
        );
        assert_eq!(files[0].contents, "var b;");
    }

    #[test]
    fn reports_missing_root() {
        let missing = PathBuf::from("./path/that/does/not/exist");
        let err = load_sources(&missing).unwrap_err();
        assert!(matches!(err, CoreError::MissingSourceRoot(path) if path == missing));
    }
}
