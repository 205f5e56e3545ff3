//! Filesystem Core Tool
//!
//! File operations the tool-augmented client exposes to the model. Every path
//! is relative to one application's artifact directory and is validated by
//! `FileSystemGuard` before any I/O.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::artifacts::write_atomic;
use crate::fs_guard::FileSystemGuard;

/// Files whose removal breaks the project build
const PROTECTED_FILES: &[&str] = &[
    "package.json",
    "index.html",
    "vite.config.js",
    "vite.config.ts",
    "src/main.js",
    "src/main.ts",
    "src/App.vue",
];

#[derive(Debug)]
pub struct FilesystemTool {
    guard: FileSystemGuard,
}

impl FilesystemTool {
    /// The workspace must exist; the tool never creates it.
    pub fn new(workspace: PathBuf) -> Result<Self> {
        Ok(Self {
            guard: FileSystemGuard::new(workspace)?,
        })
    }

    pub fn workspace(&self) -> &Path {
        self.guard.workspace()
    }

    /// Read the contents of a file.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let target = self.resolve_existing(path)?;
        info!("Reading file: {}", path);

        let content = fs::read_to_string(&target)
            .await
            .with_context(|| format!("Failed to read {}", path))?;

        debug!("Read {} bytes from {}", content.len(), path);
        Ok(content)
    }

    /// Create or overwrite a file, creating parent directories as needed.
    /// Readers never observe a half-written file.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let target = self.guard.resolve_relative(path)?;

        info!("Writing {} bytes to: {}", content.len(), path);
        write_atomic(&target, content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path))?;

        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }

    /// Replace exactly one occurrence of `old` with `new` in a file.
    pub async fn modify_file(&self, path: &str, old: &str, new: &str) -> Result<String> {
        if old.is_empty() {
            bail!("old_content must not be empty");
        }

        let target = self.resolve_existing(path)?;
        let content = fs::read_to_string(&target)
            .await
            .with_context(|| format!("Failed to read {}", path))?;

        let occurrences = content.matches(old).count();
        match occurrences {
            0 => bail!("old_content not found in {}", path),
            1 => {}
            n => bail!(
                "old_content occurs {} times in {}; include more surrounding text",
                n,
                path
            ),
        }

        let updated = content.replacen(old, new, 1);
        write_atomic(&target, updated.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path))?;

        info!("Modified {}", path);
        Ok(format!("Modified {} ({} -> {} bytes)", path, content.len(), updated.len()))
    }

    /// List files and directories at the given path.
    pub async fn list_dir(&self, path: &str) -> Result<String> {
        let target = if path.trim().is_empty() || path.trim() == "." {
            self.guard.workspace().to_path_buf()
        } else {
            self.resolve_existing(path)?
        };
        info!("Listing directory: {}", path);

        let mut entries = fs::read_dir(&target)
            .await
            .with_context(|| format!("Failed to read directory {}", path))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(format!("f  {:>8}  {}", format_size(size), name));
            }
        }

        dirs.sort();
        files.sort();

        let shown = if path.trim().is_empty() { "." } else { path.trim() };
        let mut out = Vec::with_capacity(dirs.len() + files.len() + 1);
        out.push(format!("{}/  ({} entries)", shown, dirs.len() + files.len()));
        out.extend(dirs);
        out.extend(files);
        Ok(out.join("\n"))
    }

    /// Delete a file. Core project files are refused.
    pub async fn delete_file(&self, path: &str) -> Result<String> {
        if is_protected(path) {
            warn!("Refusing to delete protected file {}", path);
            bail!("{} is a core project file and cannot be deleted", path.trim());
        }

        let target = self.resolve_existing(path)?;
        if target.is_dir() {
            bail!("{} is a directory", path);
        }

        fs::remove_file(&target)
            .await
            .with_context(|| format!("Failed to delete {}", path))?;

        info!("Deleted {}", path);
        Ok(format!("Deleted {}", path))
    }

    fn resolve_existing(&self, path: &str) -> Result<PathBuf> {
        let target = self.guard.resolve_relative(path)?;
        self.guard.validate_path(&target).map_err(|e| {
            warn!("Path validation failed for {}: {}", path, e);
            anyhow::anyhow!("{}", e)
        })
    }
}

/// Whether `path`, once `.`, `..` and repeated separators are resolved,
/// names one of `PROTECTED_FILES`.
fn is_protected(path: &str) -> bool {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    PROTECTED_FILES.iter().any(|protected| {
        Path::new(protected)
            .components()
            .map(|c| c.as_os_str())
            .eq(parts.iter().copied())
    })
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
