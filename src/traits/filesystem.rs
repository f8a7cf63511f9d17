use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Trait for filesystem operations to enable testing with mocks
pub trait FileSystem: Send + Sync {
    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write string contents to file, creating parent directories
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Check if path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Check if path is a file
    fn is_file(&self, path: &Path) -> bool;

    /// Walk directory recursively (for catalog discovery)
    fn walk_dir(&self, path: &Path, max_depth: usize) -> Result<Vec<PathBuf>>;
}

/// Real filesystem implementation using std::fs
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }

        std::fs::write(path, contents).with_context(|| format!("Failed to write file: {:?}", path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn walk_dir(&self, path: &Path, max_depth: usize) -> Result<Vec<PathBuf>> {
        use walkdir::WalkDir;

        let mut paths = Vec::new();
        for entry in WalkDir::new(path).max_depth(max_depth) {
            let entry = entry.context("Failed to walk directory")?;
            paths.push(entry.path().to_path_buf());
        }

        Ok(paths)
    }
}

/// Mock filesystem implementation for testing (in-memory)
#[allow(dead_code)]
pub struct MockFileSystem {
    files: Arc<RwLock<HashMap<PathBuf, String>>>,
    directories: Arc<RwLock<HashMap<PathBuf, ()>>>,
}

#[allow(dead_code)]
impl MockFileSystem {
    /// Create new empty mock filesystem
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            directories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a file, creating its parent directories
    pub fn add_file(&self, path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }

        self.files
            .write()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
    }

    /// Seed a directory and all of its parents
    pub fn add_dir(&self, path: &Path) {
        let mut directories = self.directories.write().unwrap();
        directories.insert(path.to_path_buf(), ());

        let mut current = path;
        while let Some(parent) = current.parent() {
            directories.insert(parent.to_path_buf(), ());
            current = parent;
        }
    }

    /// Get captured file contents for testing assertions
    pub fn get_file_contents(&self, path: &Path) -> Option<String> {
        self.files.read().unwrap().get(path).cloned()
    }

    /// Check if file was written
    pub fn has_file(&self, path: &Path) -> bool {
        self.files.read().unwrap().contains_key(path)
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .with_context(|| format!("File not found in mock filesystem: {:?}", path))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.directories.read().unwrap().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.read().unwrap().contains_key(path)
    }

    fn walk_dir(&self, path: &Path, max_depth: usize) -> Result<Vec<PathBuf>> {
        let files = self.files.read().unwrap();
        let directories = self.directories.read().unwrap();

        let mut entries = Vec::new();

        if self.is_dir(path) {
            entries.push(path.to_path_buf());
        }

        // Depth counts path components below the walked root, so
        // max_depth=1 covers the root plus its immediate children
        for file_path in files.keys() {
            if file_path.starts_with(path) && file_path != path {
                let relative = match file_path.strip_prefix(path) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                if relative.components().count() <= max_depth {
                    entries.push(file_path.clone());
                }
            }
        }

        for dir_path in directories.keys() {
            if dir_path.starts_with(path) && dir_path != path {
                let relative = match dir_path.strip_prefix(path) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                if relative.components().count() <= max_depth {
                    entries.push(dir_path.clone());
                }
            }
        }

        Ok(entries)
    }
}
