//! Zip packaging of an artifact directory for download.

use anyhow::{Context, Result};
use std::io::{Cursor, Write};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Names never included in a download
const EXCLUDED_NAMES: &[&str] = &["node_modules", "dist", ".git", ".env", ".DS_Store", ".idea", ".vscode"];

pub(crate) fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    EXCLUDED_NAMES.contains(&name.as_ref())
        || name.ends_with(".log")
        // In-flight atomic writes
        || (name.starts_with('.') && name.ends_with(".tmp"))
}

/// Compress `dir` into an in-memory zip archive.
///
/// Entry names are relative to `dir` and always use `/` separators.
/// Blocking; run it on the blocking pool.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    for entry in walker {
        let entry = entry.context("Failed to walk artifact directory")?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .context("Walked outside artifact directory")?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)
                .with_context(|| format!("Failed to add directory {}", name))?;
        } else if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", name))?;
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("Failed to add {}", name))?;
            zip.write_all(&bytes)?;
        }
    }

    let cursor = zip.finish().context("Failed to finish archive")?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn test_zip_skips_build_and_secret_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/vue")).unwrap();
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("package.json"), "{}").unwrap();
        std::fs::write(root.join("src/App.vue"), "<template/>").unwrap();
        std::fs::write(root.join("node_modules/vue/index.js"), "x").unwrap();
        std::fs::write(root.join("dist/index.html"), "built").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::write(root.join("npm-debug.log"), "log").unwrap();

        let bytes = zip_directory(root).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["package.json", "src/", "src/App.vue"]);

        let mut content = String::new();
        archive
            .by_name("src/App.vue")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<template/>");
    }
}
