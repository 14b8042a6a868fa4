//! Filesystem fixtures
//!
//! `SourceTree` writes a small directory tree into a fresh temporary
//! directory; `read_tree` reads one back as sorted (relative path, contents)
//! pairs so layouts can be compared after packaging and extraction.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A directory tree on disk that is removed when dropped
pub struct SourceTree {
    dir: TempDir,
}

impl SourceTree {
    /// Create a tree from `(relative path, contents)` pairs.
    ///
    /// Parent directories are created as needed.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        for (rel, contents) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create parent dirs");
            }
            std::fs::write(&path, contents).expect("write fixture file");
        }
        Self { dir }
    }

    /// Three files across two directory levels
    pub fn three_files() -> Self {
        Self::new(&[
            ("Dockerfile", "FROM scratch\n"),
            ("buildspec.yml", "version: 0.2\n"),
            ("app/handler.py", "def handler(event, context):\n    return event\n"),
        ])
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// Read every regular file under `root` as `(relative path, contents)`,
/// sorted by path, with `/` separators.
pub fn read_tree(root: &Path) -> Vec<(String, String)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
        for entry in std::fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .expect("path under root")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let contents = std::fs::read_to_string(&path).expect("read file");
                out.push((rel, contents));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
