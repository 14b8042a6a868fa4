//! Zip packaging of build contexts and deployment directories.
//!
//! Archives are written into a fresh temporary directory. Entry names are
//! paths relative to the packaged source root with `/` separators, sorted,
//! and carry a fixed timestamp and mode so the same tree always produces the
//! same bytes.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::task::spawn_blocking;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// One file or directory in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Where the entry was read from
    pub source: PathBuf,
    /// Name inside the archive, relative and `/`-separated.
    /// Directory names end with `/`.
    pub name: String,
}

/// A packaged zip file plus its manifest.
///
/// The zip lives in a temporary directory that is removed by
/// [`Archive::remove`] or on drop.
#[derive(Debug)]
pub struct Archive {
    root: TempDir,
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Path of the zip file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in archive order
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Delete the zip file and its temporary directory
    pub fn remove(self) -> Result<()> {
        let root = self.root.path().to_path_buf();
        self.root
            .close()
            .with_context(|| format!("Failed to remove {}", root.display()))
    }
}

/// Package every file under `src` into `<tempdir>/<file_name>`.
pub async fn package_directory(src: &Path, file_name: &str) -> Result<Archive> {
    let src = src.to_owned();
    let file_name = file_name.to_owned();
    spawn_blocking(move || package_directory_sync(&src, &file_name))
        .await
        .context("Packaging task panicked")?
}

/// Copy `src` into a fresh temporary directory.
///
/// The caller's directory is only read.
pub async fn snapshot_directory(src: &Path) -> Result<TempDir> {
    let src = src.to_owned();
    spawn_blocking(move || snapshot_directory_sync(&src))
        .await
        .context("Snapshot task panicked")?
}

fn package_directory_sync(src: &Path, file_name: &str) -> Result<Archive> {
    if !src.is_dir() {
        anyhow::bail!("{} is not a directory", src.display());
    }

    let root = TempDir::new().context("Failed to create archive directory")?;
    let path = root.path().join(file_name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let dir_options = options.unix_permissions(0o755);

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let mut entries = Vec::new();

    for source in walk_sorted(src)? {
        let relative = source
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", source.display(), src.display()))?;
        let mut name = entry_name(relative);

        if source.is_dir() {
            name.push('/');
            zip.add_directory(name.as_str(), dir_options)
                .with_context(|| format!("Failed to add directory {name}"))?;
        } else {
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("Failed to add file {name}"))?;
            let mut input = File::open(&source)
                .with_context(|| format!("Failed to open {}", source.display()))?;
            std::io::copy(&mut input, &mut zip)
                .with_context(|| format!("Failed to compress {}", source.display()))?;
        }

        entries.push(ArchiveEntry { source, name });
    }

    let mut writer = zip.finish().context("Failed to finish zip")?;
    writer.flush().context("Failed to flush zip")?;

    debug!(
        archive = %path.display(),
        entries = entries.len(),
        "Packaged directory"
    );

    Ok(Archive {
        root,
        path,
        entries,
    })
}

fn snapshot_directory_sync(src: &Path) -> Result<TempDir> {
    if !src.is_dir() {
        anyhow::bail!("{} is not a directory", src.display());
    }

    let dest = TempDir::new().context("Failed to create snapshot directory")?;
    for source in walk_sorted(src)? {
        let relative = source
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", source.display(), src.display()))?;
        let target = dest.path().join(relative);
        if source.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            std::fs::copy(&source, &target)
                .with_context(|| format!("Failed to copy {}", source.display()))?;
        }
    }

    debug!(src = %src.display(), dest = %dest.path().display(), "Snapshotted directory");
    Ok(dest)
}

/// Every path under `root` (excluding `root`), depth-first, children sorted
/// by name so parents precede their contents.
fn walk_sorted(root: &Path) -> Result<Vec<PathBuf>> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read {}", root.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to list {}", root.display()))?;
    children.sort();

    let mut paths = Vec::new();
    for child in children {
        let is_dir = child.is_dir();
        paths.push(child.clone());
        if is_dir {
            paths.extend(walk_sorted(&child)?);
        }
    }
    Ok(paths)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgship_test_utils::{SourceTree, read_tree};
    use std::io::Read;

    fn read_zip(path: &Path) -> zip::ZipArchive<File> {
        zip::ZipArchive::new(File::open(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn entries_are_relative_and_sorted() {
        let tree = SourceTree::three_files();
        let archive = package_directory(tree.path(), "ctx.zip").await.unwrap();

        let names: Vec<_> = archive.entry_names().collect();
        assert_eq!(
            names,
            vec!["Dockerfile", "app/", "app/handler.py", "buildspec.yml"]
        );

        let tmp = tree.path().to_string_lossy().into_owned();
        let root = archive.path().parent().unwrap().to_string_lossy().into_owned();
        for name in archive.entry_names() {
            assert!(!name.starts_with('/'));
            assert!(!name.contains(&tmp));
            assert!(!name.contains(&root));
        }
    }

    #[tokio::test]
    async fn archive_round_trips_to_source_layout() {
        let tree = SourceTree::three_files();
        let archive = package_directory(tree.path(), "ctx.zip").await.unwrap();

        let out = TempDir::new().unwrap();
        read_zip(archive.path()).extract(out.path()).unwrap();

        assert_eq!(read_tree(out.path()), read_tree(tree.path()));
    }

    #[tokio::test]
    async fn zip_contents_match_manifest() {
        let tree = SourceTree::three_files();
        let archive = package_directory(tree.path(), "ctx.zip").await.unwrap();

        let mut zip = read_zip(archive.path());
        let in_zip: Vec<String> = zip.file_names().map(str::to_string).collect();
        let mut expected: Vec<String> = archive.entry_names().map(str::to_string).collect();
        let mut sorted_zip = in_zip.clone();
        sorted_zip.sort();
        expected.sort();
        assert_eq!(sorted_zip, expected);

        let mut handler = String::new();
        zip.by_name("app/handler.py")
            .unwrap()
            .read_to_string(&mut handler)
            .unwrap();
        assert!(handler.contains("def handler"));
    }

    #[tokio::test]
    async fn packaging_is_deterministic() {
        let tree = SourceTree::three_files();
        let a = package_directory(tree.path(), "a.zip").await.unwrap();
        let b = package_directory(tree.path(), "b.zip").await.unwrap();

        let bytes_a = std::fs::read(a.path()).unwrap();
        let bytes_b = std::fs::read(b.path()).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[tokio::test]
    async fn remove_deletes_temporary_root() {
        let tree = SourceTree::three_files();
        let archive = package_directory(tree.path(), "ctx.zip").await.unwrap();
        let root = archive.path().parent().unwrap().to_path_buf();
        assert!(archive.path().exists());

        archive.remove().unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let err = package_directory(Path::new("/nonexistent/imgship"), "x.zip")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn snapshot_copies_without_touching_source() {
        let tree = SourceTree::three_files();
        let before = read_tree(tree.path());

        let snapshot = snapshot_directory(tree.path()).await.unwrap();
        assert_ne!(snapshot.path(), tree.path());
        assert_eq!(read_tree(snapshot.path()), before);

        std::fs::write(snapshot.path().join("extra.txt"), "x").unwrap();
        assert_eq!(read_tree(tree.path()), before);
    }
}
