//! Preview Capture - injected screenshot capability
//!
//! The publisher only sees the `Screenshotter` trait. Failures come back as
//! values and are downgraded to warnings by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Hard upper bound on one page load + capture.
pub const PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("failed to launch {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("preview capture timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("preview capture exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("preview capture produced no file at {}", .0.display())]
    NoOutput(PathBuf),

    #[error("preview runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

pub trait Screenshotter {
    fn capture(&self, url: &str, dest: &Path, timeout: Duration) -> Result<(), PreviewError>;
}

/// Accepts every request and writes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScreenshotter;

impl Screenshotter for NoopScreenshotter {
    fn capture(&self, _url: &str, _dest: &Path, _timeout: Duration) -> Result<(), PreviewError> {
        Ok(())
    }
}

/// Headless Chromium via its `--screenshot` switch.
/// Viewport of the captured preview.
const PREVIEW_WINDOW: (u32, u32) = (1280, 720);

#[derive(Debug, Clone)]
pub struct ChromiumScreenshotter {
    binary: PathBuf,
}

impl ChromiumScreenshotter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    async fn capture_async(&self, url: &str, dest: &Path, timeout: Duration) -> Result<(), PreviewError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", PREVIEW_WINDOW.0, PREVIEW_WINDOW.1))
            .arg(format!("--screenshot={}", dest.display()))
            .arg(url)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| PreviewError::Launch {
                binary: self.binary.display().to_string(),
                source,
            })?,
            Err(_) => return Err(PreviewError::Timeout { secs: timeout.as_secs() }),
        };

        if !output.status.success() {
            return Err(PreviewError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Err(PreviewError::NoOutput(dest.to_path_buf()));
        }
        Ok(())
    }
}

impl Screenshotter for ChromiumScreenshotter {
    fn capture(&self, url: &str, dest: &Path, timeout: Duration) -> Result<(), PreviewError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(self.capture_async(url, dest, timeout))
    }
}
