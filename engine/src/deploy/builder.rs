//! Project builds for the tool-built strategy.
//!
//! Runs the package manager directly (no shell) with stdin closed and
//! output captured, bounded by a timeout per step.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Directory a successful build leaves its output in
pub const BUILD_OUTPUT_DIR: &str = "dist";

/// Trailing stderr kept in a build failure message
const STDERR_TAIL: usize = 2000;

/// Compiles a project directory into `dist/`
#[async_trait]
pub trait ProjectBuilder: Send + Sync {
    /// Build `project_dir`. On success `project_dir/dist` must exist.
    async fn build(&self, project_dir: &Path) -> Result<(), EngineError>;
}

/// `npm install` followed by `npm run build`
#[derive(Debug, Clone)]
pub struct NpmProjectBuilder {
    npm: String,
    install_timeout: Duration,
    build_timeout: Duration,
}

impl NpmProjectBuilder {
    pub fn new(npm: impl Into<String>, install_timeout: Duration, build_timeout: Duration) -> Self {
        Self {
            npm: npm.into(),
            install_timeout,
            build_timeout,
        }
    }

    async fn run_step(
        &self,
        project_dir: &Path,
        args: &[&str],
        limit: Duration,
    ) -> Result<(), EngineError> {
        let step = format!("{} {}", self.npm, args.join(" "));
        debug!("Running '{}' in {}", step, project_dir.display());

        let child = Command::new(&self.npm)
            .args(args)
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EngineError::BuildFailed(format!(
                    "could not start '{}': {}",
                    step, e
                )))
            }
            Err(_) => {
                warn!("'{}' timed out after {}s", step, limit.as_secs());
                return Err(EngineError::BuildFailed(format!(
                    "'{}' timed out after {}s",
                    step,
                    limit.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::BuildFailed(format!(
                "'{}' exited with {}: {}",
                step,
                output.status,
                tail(stderr.trim(), STDERR_TAIL)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ProjectBuilder for NpmProjectBuilder {
    async fn build(&self, project_dir: &Path) -> Result<(), EngineError> {
        if !project_dir.join("package.json").is_file() {
            return Err(EngineError::BuildFailed(
                "project has no package.json".to_string(),
            ));
        }

        self.run_step(project_dir, &["install", "--no-audit", "--no-fund"], self.install_timeout)
            .await?;
        self.run_step(project_dir, &["run", "build"], self.build_timeout)
            .await?;

        if !project_dir.join(BUILD_OUTPUT_DIR).is_dir() {
            return Err(EngineError::BuildFailed(format!(
                "build finished without a {} directory",
                BUILD_OUTPUT_DIR
            )));
        }

        info!("Built project {}", project_dir.display());
        Ok(())
    }
}

/// Last `max` bytes of `text`, cut on a character boundary
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
