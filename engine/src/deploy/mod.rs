//! Build & Deploy Pipeline
//!
//! Publishes an application's artifacts under a stable deploy key:
//!
//! 1. Only the owner may deploy
//! 2. The artifact directory must hold at least one generated file
//! 3. Project builds run `npm` and publish `dist/`; other strategies publish
//!    the raw artifact tree
//! 4. The deploy key is assigned once and reused on every later deploy
//! 5. Files are copied into a staging directory and swapped into
//!    `{deploy_dir}/{key}`, so a failed copy leaves the previous deploy live
//! 6. The deploy timestamp is recorded and the public URL returned
//! 7. A cover screenshot is captured in the background

pub mod builder;
pub mod screenshot;

pub use builder::{NpmProjectBuilder, ProjectBuilder, BUILD_OUTPUT_DIR};
pub use screenshot::{ChromeScreenshotCapturer, ScreenshotCapturer, ScreenshotWorker};

use crate::artifacts::ArtifactWriter;
use crate::db::AppRepository;
use crate::engine_error;
use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sdk::errors::EngineError;
use sdk::types::{AppId, UserId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Length of a generated deploy key
pub const DEPLOY_KEY_LEN: usize = 6;

/// Entry file appended to the URL of project builds
pub const PROJECT_ENTRY: &str = "dist/index.html";

/// Fresh keys tried before giving up on unique collisions
const KEY_ATTEMPTS: usize = 8;

/// Result of a deploy, with the background screenshot task if one started
#[derive(Debug)]
pub struct Deployment {
    pub deploy_key: String,
    pub url: String,
    pub deployed_at: i64,
    pub screenshot: Option<JoinHandle<()>>,
}

pub struct DeployService {
    apps: AppRepository,
    artifacts: ArtifactWriter,
    deploy_root: PathBuf,
    host: String,
    builder: Arc<dyn ProjectBuilder>,
    screenshots: Option<ScreenshotWorker>,
}

impl DeployService {
    pub fn new(
        apps: AppRepository,
        artifacts: ArtifactWriter,
        deploy_root: impl Into<PathBuf>,
        host: impl Into<String>,
        builder: Arc<dyn ProjectBuilder>,
        screenshots: Option<ScreenshotWorker>,
    ) -> Self {
        Self {
            apps,
            artifacts,
            deploy_root: deploy_root.into(),
            host: host.into().trim_end_matches('/').to_string(),
            builder,
            screenshots,
        }
    }

    pub fn deploy_root(&self) -> &Path {
        &self.deploy_root
    }

    /// Deploy and return the public URL. The screenshot runs detached.
    pub async fn deploy(&self, app_id: AppId, user: UserId) -> Result<String, EngineError> {
        self.deploy_and_track(app_id, user).await.map(|d| d.url)
    }

    /// Deploy and return the full outcome, including the screenshot handle.
    pub async fn deploy_and_track(
        &self,
        app_id: AppId,
        user: UserId,
    ) -> Result<Deployment, EngineError> {
        app_id.validate()?;

        let app = self
            .apps
            .get(app_id)
            .await
            .map_err(engine_error)?
            .ok_or_else(|| EngineError::NotFound(format!("application {}", app_id)))?;

        if app.user_id != user {
            warn!(app_id = %app_id, user = user.0, "Deploy refused for non-owner");
            return Err(EngineError::Forbidden(format!(
                "application {} belongs to another user",
                app_id
            )));
        }

        let strategy = app.strategy;
        let source_dir = self.artifacts.app_dir(app_id, strategy);
        if !self.artifacts.has_artifacts(app_id, strategy) {
            return Err(EngineError::NotFound(format!(
                "no generated code for application {}; generate before deploying",
                app_id
            )));
        }

        let (publish_source, publish_prefix) = if strategy.requires_build() {
            info!(app_id = %app_id, "Building project before deploy");
            self.builder.build(&source_dir).await?;
            let dist = source_dir.join(BUILD_OUTPUT_DIR);
            if !dist.is_dir() {
                return Err(EngineError::BuildFailed(format!(
                    "build finished without a {} directory",
                    BUILD_OUTPUT_DIR
                )));
            }
            (dist, Some(BUILD_OUTPUT_DIR))
        } else {
            (source_dir, None)
        };

        let deploy_key = self.ensure_deploy_key(app_id).await?;

        let target = self.deploy_root.join(&deploy_key);
        let root = self.deploy_root.clone();
        let key = deploy_key.clone();
        let published = tokio::task::spawn_blocking(move || {
            publish(&root, &key, &publish_source, publish_prefix)
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);
        if let Err(e) = published {
            // Paths stay in the log; the caller only learns the key is kept
            warn!(app_id = %app_id, deploy_key = %deploy_key, error = %format!("{:#}", e), "Publish failed");
            return Err(EngineError::Publish(format!(
                "could not publish application {}; deploy key {} is kept for the next attempt",
                app_id, deploy_key
            )));
        }

        let deployed_at = self
            .apps
            .mark_deployed(app_id)
            .await
            .map_err(engine_error)?;

        let mut url = format!("{}/{}/", self.host, deploy_key);
        if strategy.requires_build() {
            url.push_str(PROJECT_ENTRY);
        }

        info!(
            app_id = %app_id,
            strategy = %strategy,
            deploy_key = %deploy_key,
            target = %target.display(),
            "Application deployed"
        );

        let screenshot = self
            .screenshots
            .as_ref()
            .map(|worker| worker.spawn(app_id, url.clone()));

        Ok(Deployment {
            deploy_key,
            url,
            deployed_at,
            screenshot,
        })
    }

    /// Stored key, or a fresh one persisted now.
    async fn ensure_deploy_key(&self, app_id: AppId) -> Result<String, EngineError> {
        for _ in 0..KEY_ATTEMPTS {
            let candidate = generate_deploy_key();
            match self
                .apps
                .assign_deploy_key(app_id, &candidate)
                .await
                .map_err(engine_error)?
            {
                Some(key) => return Ok(key),
                None => debug!(app_id = %app_id, "Deploy key collision, retrying"),
            }
        }

        Err(EngineError::Database(format!(
            "no unique deploy key after {} attempts",
            KEY_ATTEMPTS
        )))
    }
}

/// Random alphanumeric key of `DEPLOY_KEY_LEN` characters
pub fn generate_deploy_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DEPLOY_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Replace `{root}/{key}` with the contents of `source`, placed under
/// `prefix` when given. Blocking.
fn publish(root: &Path, key: &str, source: &Path, prefix: Option<&str>) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create deploy root {}", root.display()))?;

    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let staging = root.join(format!(".{}.staging-{}", key, nonce));
    let target = root.join(key);

    let copy_target = match prefix {
        Some(prefix) => staging.join(prefix),
        None => staging.clone(),
    };
    if let Err(e) = copy_tree(source, &copy_target) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let retired = root.join(format!(".{}.old-{}", key, nonce));
    if target.exists() {
        std::fs::rename(&target, &retired)
            .with_context(|| format!("Failed to retire {}", target.display()))?;
    }

    if let Err(e) = std::fs::rename(&staging, &target) {
        // Put the previous deploy back
        if retired.exists() {
            let _ = std::fs::rename(&retired, &target);
        }
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e).with_context(|| format!("Failed to publish {}", target.display()));
    }

    if retired.exists() {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            warn!("Failed to remove retired deploy {}: {}", retired.display(), e);
        }
    }

    Ok(())
}

/// Copy regular files and directories of `source` into `dest`.
/// Symlinks are skipped.
fn copy_tree(source: &Path, dest: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.context("Failed to walk publish source")?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("Walked outside publish source")?;
        let out = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &out)
                .with_context(|| format!("Failed to copy {}", relative.display()))?;
        }
    }

    Ok(())
}
