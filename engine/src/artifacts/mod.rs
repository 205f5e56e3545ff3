//! Artifact Writer
//!
//! Persists generation output under `{code_output_dir}/{strategy}_{appId}`.
//! The directory name is deterministic, so every generation for an
//! application overwrites the previous files in place.
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! concurrent reader (the archive download, a deploy copy) sees either the old
//! or the new content, never a prefix.

pub mod archive;
pub mod parser;

use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sdk::types::{AppId, Strategy};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use parser::CodeParser;

/// File names used by the single document and multi-file strategies
pub const HTML_FILE: &str = "index.html";
pub const CSS_FILE: &str = "style.css";
pub const JS_FILE: &str = "script.js";

/// Output of one generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    /// One self-contained document
    SingleDocument { html: String },

    /// Markup, style and script bodies
    MultiFile {
        html: String,
        css: String,
        js: String,
    },

    /// Files were written by tool calls during the session; nothing to add
    ToolBuilt,
}

impl GenerationResult {
    pub fn strategy(&self) -> Strategy {
        match self {
            GenerationResult::SingleDocument { .. } => Strategy::SingleDocument,
            GenerationResult::MultiFile { .. } => Strategy::MultiFile,
            GenerationResult::ToolBuilt => Strategy::ToolBuiltProject,
        }
    }
}

/// Writes generation results into per-application directories
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic artifact directory of an application
    pub fn app_dir(&self, app_id: AppId, strategy: Strategy) -> PathBuf {
        self.root.join(strategy.artifact_dir_name(app_id))
    }

    /// Create the artifact directory if needed and return it
    pub async fn ensure_app_dir(&self, app_id: AppId, strategy: Strategy) -> Result<PathBuf> {
        let dir = self.app_dir(app_id, strategy);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Whether the application has at least one generated file.
    ///
    /// A project workspace exists as soon as its session client is built, so
    /// an empty directory, or one holding only build output and in-flight
    /// temporaries, does not count.
    pub fn has_artifacts(&self, app_id: AppId, strategy: Strategy) -> bool {
        WalkDir::new(self.app_dir(app_id, strategy))
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !archive::is_excluded(e))
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file())
    }

    /// Write `result` for `app_id` and return the artifact directory.
    ///
    /// # Errors
    /// `EngineError::Validation` when `result` does not belong to `strategy`;
    /// `EngineError::Io` when a file cannot be written.
    pub async fn write(
        &self,
        app_id: AppId,
        strategy: Strategy,
        result: &GenerationResult,
    ) -> Result<PathBuf, EngineError> {
        if result.strategy() != strategy {
            return Err(EngineError::Validation(format!(
                "{} result cannot be written for a {} application",
                result.strategy(),
                strategy
            )));
        }

        let dir = self
            .ensure_app_dir(app_id, strategy)
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(format!("{:#}", e))))?;

        let files: Vec<(&str, &str)> = match result {
            GenerationResult::SingleDocument { html } => vec![(HTML_FILE, html.as_str())],
            GenerationResult::MultiFile { html, css, js } => vec![
                (HTML_FILE, html.as_str()),
                (CSS_FILE, css.as_str()),
                (JS_FILE, js.as_str()),
            ],
            GenerationResult::ToolBuilt => Vec::new(),
        };

        for (name, body) in &files {
            write_atomic(&dir.join(name), body.as_bytes()).await?;
        }

        info!(
            app_id = %app_id,
            strategy = %strategy,
            files = files.len(),
            "Artifacts written"
        );
        Ok(dir)
    }
}

/// Write `bytes` to `path` through a temporary sibling and an atomic rename.
///
/// Parent directories are created. The temporary file lives in the same
/// directory so the rename never crosses filesystems.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    } else {
        debug!("Atomically wrote {} bytes to {}", bytes.len(), path.display());
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_single_document_written_to_strategy_dir() {
        let temp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path());

        let dir = writer
            .write(
                AppId(7),
                Strategy::SingleDocument,
                &GenerationResult::SingleDocument {
                    html: "<h1>hi</h1>".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(dir, temp.path().join("html_7"));
        assert_eq!(
            std::fs::read_to_string(dir.join("index.html")).unwrap(),
            "<h1>hi</h1>"
        );
    }

    #[tokio::test]
    async fn test_multi_file_round_trip_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path());
        let result = GenerationResult::MultiFile {
            html: "<!DOCTYPE html>\n<link rel=\"stylesheet\" href=\"style.css\">".to_string(),
            css: "body { margin: 0; }\n/* ünïcödé */".to_string(),
            js: "console.log('ready');\r\n".to_string(),
        };

        let dir = writer
            .write(AppId(3), Strategy::MultiFile, &result)
            .await
            .unwrap();

        let GenerationResult::MultiFile { html, css, js } = &result else {
            unreachable!()
        };
        assert_eq!(std::fs::read(dir.join(HTML_FILE)).unwrap(), html.as_bytes());
        assert_eq!(std::fs::read(dir.join(CSS_FILE)).unwrap(), css.as_bytes());
        assert_eq!(std::fs::read(dir.join(JS_FILE)).unwrap(), js.as_bytes());
    }

    #[tokio::test]
    async fn test_rewrite_overwrites_in_place_without_temp_leftovers() {
        let temp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path());

        for body in ["first", "second"] {
            writer
                .write(
                    AppId(1),
                    Strategy::SingleDocument,
                    &GenerationResult::SingleDocument {
                        html: body.to_string(),
                    },
                )
                .await
                .unwrap();
        }

        let dir = writer.app_dir(AppId(1), Strategy::SingleDocument);
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["index.html".to_string()]);
        assert_eq!(std::fs::read_to_string(dir.join("index.html")).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_empty_workspace_has_no_artifacts() {
        let temp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path());
        let app = AppId(4);
        let strategy = Strategy::ToolBuiltProject;

        assert!(!writer.has_artifacts(app, strategy));

        let dir = writer.ensure_app_dir(app, strategy).await.unwrap();
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::create_dir_all(dir.join("node_modules/vue")).unwrap();
        std::fs::write(dir.join("node_modules/vue/index.js"), "").unwrap();
        std::fs::write(dir.join(".main.js.0a1b.tmp"), "partial").unwrap();
        assert!(!writer.has_artifacts(app, strategy));

        std::fs::write(dir.join("src/main.js"), "import './App.vue'").unwrap();
        assert!(writer.has_artifacts(app, strategy));
    }

    #[tokio::test]
    async fn test_mismatched_result_rejected() {
        let temp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path());

        let err = writer
            .write(
                AppId(1),
                Strategy::MultiFile,
                &GenerationResult::SingleDocument {
                    html: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!writer.app_dir(AppId(1), Strategy::MultiFile).exists());
    }
}
