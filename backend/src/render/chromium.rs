//! Headless Chromium engine using chromiumoxide.
//!
//! Requires the `browser` feature (on by default). Each session launches its
//! own browser process with a throwaway profile directory; closing the
//! session shuts the process down, kills it if it does not exit, stops the
//! CDP handler task and removes the profile.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{BarrierState, RenderEngine, RenderSession};
use crate::error::{RenderError, RenderResult};
use crate::models::ExportFormat;

/// Window size for composed documents.
pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 900;

/// A4 in inches.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

/// Grace period for the browser to exit after `Browser.close`.
const EXIT_GRACE: Duration = Duration::from_secs(5);

const BARRIER_PROBE: &str = r#"(() => {
  if (window.chartsRenderError) {
    return { state: 'failed', error: String(window.chartsRenderError) };
  }
  return { state: window.chartsRendered === true ? 'done' : 'pending' };
})()"#;

/// Launches one headless Chromium per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    chrome_path: Option<PathBuf>,
}

impl ChromiumEngine {
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        Self { chrome_path }
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self) -> RenderResult<Box<dyn RenderSession>> {
        let chrome_path = find_chrome_binary(self.chrome_path.as_deref())?;
        let user_data_dir = std::env::temp_dir().join(format!("chartforge-chrome-{}", Uuid::new_v4()));

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .user_data_dir(&user_data_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-dev-shm-usage")
            .arg("--hide-scrollbars")
            .build()
            .map_err(|e| RenderError::Launch(format!("Failed to build browser config: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(format!("Failed to launch Chrome: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!(error = %e, "cdp handler event error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                // The process is already running; do not leak it.
                shutdown(&mut browser, handler_task, &user_data_dir).await;
                return Err(RenderError::Launch(format!("Failed to create page: {}", e)));
            }
        };

        tracing::debug!(profile = %user_data_dir.display(), "chromium session started");
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler: handler_task,
            user_data_dir,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn load(&mut self, html: &str) -> RenderResult<()> {
        self.page
            .set_content(html)
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?;
        Ok(())
    }

    async fn barrier(&mut self) -> RenderResult<BarrierState> {
        let result = self
            .page
            .evaluate(BARRIER_PROBE)
            .await
            .map_err(|e| RenderError::Script(format!("barrier poll failed: {}", e)))?;
        let value = result.into_value::<Value>().unwrap_or(Value::Null);

        Ok(match value.get("state").and_then(Value::as_str) {
            Some("done") => BarrierState::Done,
            Some("failed") => BarrierState::Failed(
                value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("chart rendering failed")
                    .to_string(),
            ),
            _ => BarrierState::Pending,
        })
    }

    async fn capture(&mut self, format: ExportFormat, path: &Path) -> RenderResult<()> {
        let bytes = match format {
            ExportFormat::Pdf => {
                let params = PrintToPdfParams::builder()
                    .print_background(true)
                    .paper_width(A4_WIDTH_IN)
                    .paper_height(A4_HEIGHT_IN)
                    .build();
                self.page
                    .pdf(params)
                    .await
                    .map_err(|e| RenderError::Capture(format!("pdf: {}", e)))?
            }
            ExportFormat::Png => self
                .page
                .screenshot(ScreenshotParams::builder().full_page(true).build())
                .await
                .map_err(|e| RenderError::Capture(format!("screenshot: {}", e)))?,
            other => {
                return Err(RenderError::Capture(format!(
                    "{} is not a document format",
                    other.extension()
                )))
            }
        };
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        let ChromiumSession {
            mut browser,
            page,
            handler,
            user_data_dir,
        } = *self;
        drop(page);
        shutdown(&mut browser, handler, &user_data_dir).await;
        Ok(())
    }
}

/// Close the browser, kill it if it lingers, stop the handler and remove the
/// profile directory.
async fn shutdown(browser: &mut Browser, handler: JoinHandle<()>, user_data_dir: &Path) {
    if let Err(e) = browser.close().await {
        tracing::debug!(error = %e, "browser close command failed");
    }
    match tokio::time::timeout(EXIT_GRACE, browser.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "waiting for browser exit failed"),
        Err(_) => {
            tracing::warn!("browser did not exit in time, killing it");
            if let Some(Err(e)) = browser.kill().await {
                tracing::warn!(error = %e, "failed to kill browser");
            }
        }
    }
    handler.abort();

    if let Err(e) = tokio::fs::remove_dir_all(user_data_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %user_data_dir.display(), error = %e, "profile cleanup failed");
        }
    }
}

/// Find a Chrome or Chromium binary on the system.
pub fn find_chrome_binary(configured: Option<&Path>) -> RenderResult<PathBuf> {
    // 1. Configured path
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(RenderError::Unavailable(format!(
            "configured Chrome binary {} does not exist",
            path.display()
        )));
    }

    // 2. Platform default locations
    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &[
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    #[cfg(target_os = "windows")]
    let candidates: &[&str] = &[
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let candidates: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            RenderError::Unavailable(
                "no Chrome or Chromium binary found; set CHARTFORGE_CHROME_PATH".to_string(),
            )
        })
}
