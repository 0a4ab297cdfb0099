//! In-memory filesystem for sampler tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::fs::FileSystem;

#[derive(Debug, Default)]
struct Tree {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

/// Shared, mutable in-memory filesystem.
///
/// Clones share the same tree, so a test can keep a handle and rewrite
/// `/proc` files while a sampler thread reads them.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file. Parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        add_parents(&mut tree, &path);
        tree.files.insert(path, content.into());
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }

    /// Adds a thread of `pid` with a minimal `stat` file.
    pub fn add_thread(&self, pid: i32, tid: i32, name: &str, state: char) {
        self.add_file(
            format!("/proc/{}/task/{}/stat", pid, tid),
            format!(
                "{} ({}) {} 1 0 0 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 0 0 0",
                tid, name, state
            ),
        );
    }
}

fn add_parents(tree: &mut Tree, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if !p.as_os_str().is_empty() {
            tree.directories.insert(p.to_path_buf());
        }
        parent = p.parent();
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        if !tree.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries: HashSet<PathBuf> = HashSet::new();
        let children = tree
            .files
            .keys()
            .chain(tree.directories.iter())
            .filter(|p| p.parent() == Some(path));
        for child in children {
            entries.insert(child.clone());
        }

        let mut entries: Vec<PathBuf> = entries.into_iter().collect();
        entries.sort();
        Ok(entries)
    }
}
