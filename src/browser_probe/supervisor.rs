//! Shared browser lifecycle supervisor
//!
//! One long-lived headless browser serves all browser probes. It is launched
//! lazily on first use, health-checked on every acquisition, and closed by a
//! background reaper after five minutes without probes; the next probe
//! relaunches it. Lifecycle transitions (launch/close) hold the supervisor
//! mutex so probes never observe a half-built instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chromiumoxide::browser::Browser;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::launch::launch_browser;

/// Close the browser after this much probe inactivity.
pub const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the reaper checks for idleness.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// A launched browser with its handler task and profile directory.
struct BrowserHandle {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl BrowserHandle {
    /// Best-effort close: graceful when no probe still holds the browser,
    /// otherwise the handler abort tears the CDP connection down.
    async fn close(mut self) {
        match Arc::get_mut(&mut self.browser) {
            Some(browser) => {
                if let Err(e) = browser.close().await {
                    warn!("failed to close browser cleanly: {e}");
                }
                let _ = browser.wait().await;
            }
            None => {
                warn!("browser has outstanding probe references, skipping graceful close");
            }
        }
        self.handler_task.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!(
                "failed to remove browser profile {}: {e}",
                self.user_data_dir.display()
            );
        }
    }
}

/// Supervisor owning the shared browser instance.
#[derive(Clone)]
pub struct BrowserSupervisor {
    handle: Arc<Mutex<Option<BrowserHandle>>>,
    last_used: Arc<Mutex<Instant>>,
    reaper: Arc<Mutex<Option<JoinHandle<()>>>>,
    idle_timeout: Duration,
    headless: bool,
}

impl BrowserSupervisor {
    /// Create a supervisor; no browser is launched until the first probe.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(BROWSER_IDLE_TIMEOUT)
    }

    /// Create a supervisor with a custom idle timeout (tests shorten it).
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            handle: Arc::new(Mutex::new(None)),
            last_used: Arc::new(Mutex::new(Instant::now())),
            reaper: Arc::new(Mutex::new(None)),
            idle_timeout,
            headless: true,
        }
    }

    /// Get the shared browser, launching or relaunching as needed.
    ///
    /// Health is verified with a `version()` CDP round trip; a crashed
    /// instance is cleaned up and replaced transparently.
    pub async fn acquire(&self) -> Result<Arc<Browser>> {
        self.touch().await;
        let mut guard = self.handle.lock().await;

        if let Some(handle) = guard.as_ref() {
            match handle.browser.version().await {
                Ok(_) => {
                    debug!("browser health check passed, reusing instance");
                    return Ok(Arc::clone(&handle.browser));
                }
                Err(e) => {
                    warn!("browser health check failed: {e}; relaunching");
                    if let Some(crashed) = guard.take() {
                        crashed.close().await;
                    }
                }
            }
        }

        info!("launching shared probe browser (first use or after idle shutdown)");
        let (browser, handler_task, user_data_dir) = launch_browser(self.headless).await?;
        let handle = BrowserHandle {
            browser: Arc::new(browser),
            handler_task,
            user_data_dir,
        };
        let browser = Arc::clone(&handle.browser);
        *guard = Some(handle);
        drop(guard);

        self.ensure_reaper().await;
        Ok(browser)
    }

    /// Record probe activity; the idle clock restarts.
    pub async fn touch(&self) {
        *self.last_used.lock().await = Instant::now();
    }

    /// Whether a browser instance is currently alive.
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Shut down the browser and stop the reaper. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if let Some(reaper) = self.reaper.lock().await.take() {
            reaper.abort();
        }
        if let Some(handle) = self.handle.lock().await.take() {
            info!("shutting down shared probe browser");
            handle.close().await;
        }
    }

    async fn ensure_reaper(&self) {
        let mut reaper = self.reaper.lock().await;
        if reaper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let supervisor = self.clone();
        *reaper = Some(tokio::spawn(async move {
            supervisor.reaper_loop().await;
        }));
    }

    /// Background task: close the browser once it has sat idle long enough.
    async fn reaper_loop(self) {
        let mut interval = tokio::time::interval(REAPER_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            let idle_for = self.last_used.lock().await.elapsed();
            if idle_for < self.idle_timeout {
                continue;
            }

            let mut guard = self.handle.lock().await;
            if let Some(handle) = guard.take() {
                info!(idle_secs = idle_for.as_secs(), "closing idle probe browser");
                handle.close().await;
            }
        }
    }
}

impl Default for BrowserSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
