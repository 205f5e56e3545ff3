//! Best-effort cover screenshots of deployed applications.
//!
//! Captures run on detached tasks bounded by a semaphore. A capture gets one
//! attempt; its outcome never reaches the deploy caller.

use crate::db::AppRepository;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::AppId;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Viewport used for covers
const WINDOW_SIZE: &str = "1600,900";

/// Renders a URL and returns a reference to the stored image
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    async fn capture(&self, url: &str) -> Result<String, EngineError>;
}

/// Headless Chrome writing PNG files into a local directory
#[derive(Debug, Clone)]
pub struct ChromeScreenshotCapturer {
    chrome: String,
    output_dir: PathBuf,
    timeout: Duration,
    public_base_url: Option<String>,
}

impl ChromeScreenshotCapturer {
    pub fn new(
        chrome: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        timeout: Duration,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            chrome: chrome.into(),
            output_dir: output_dir.into(),
            timeout,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Public reference for a stored file name: a URL when a base is
    /// configured, the local path otherwise.
    fn reference(&self, file_name: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, file_name),
            None => self.output_dir.join(file_name).display().to_string(),
        }
    }
}

#[async_trait]
impl ScreenshotCapturer for ChromeScreenshotCapturer {
    async fn capture(&self, url: &str) -> Result<String, EngineError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let file_name = format!("{}.png", uuid::Uuid::new_v4().simple());
        let target = self.output_dir.join(&file_name);

        let run = Command::new(&self.chrome)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={}", WINDOW_SIZE))
            .arg(format!("--screenshot={}", target.display()))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                EngineError::ToolError(format!(
                    "screenshot timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| EngineError::ToolError(format!("could not start {}: {}", self.chrome, e)))?;

        if !output.status.success() || !target.is_file() {
            return Err(EngineError::ToolError(format!(
                "{} exited with {}: {}",
                self.chrome,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("Screenshot of {} saved to {}", url, target.display());
        Ok(self.reference(&file_name))
    }
}

/// Bounded pool of detached capture tasks that update application covers
#[derive(Clone)]
pub struct ScreenshotWorker {
    capturer: Arc<dyn ScreenshotCapturer>,
    apps: AppRepository,
    permits: Arc<Semaphore>,
}

impl ScreenshotWorker {
    pub fn new(capturer: Arc<dyn ScreenshotCapturer>, apps: AppRepository, workers: usize) -> Self {
        Self {
            capturer,
            apps,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Capture `url` in the background and store it as the cover of `app_id`.
    ///
    /// The handle may be dropped; the task keeps running.
    pub fn spawn(&self, app_id: AppId, url: String) -> JoinHandle<()> {
        let capturer = Arc::clone(&self.capturer);
        let apps = self.apps.clone();
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            let cover = match capturer.capture(&url).await {
                Ok(cover) => cover,
                Err(e) => {
                    warn!(app_id = %app_id, url = %url, error = %e, "Screenshot failed");
                    return;
                }
            };

            match apps.set_cover(app_id, &cover).await {
                Ok(()) => info!(app_id = %app_id, cover = %cover, "Cover updated"),
                Err(e) => warn!(app_id = %app_id, error = %format!("{:#}", e), "Cover not saved"),
            }
        })
    }
}
