use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::scrapers::session::{BrowserSession, Navigator, PageContent, SessionFactory};
use crate::scrapers::stealth::{looks_blocked, StealthConfig};

/// Launches one headless Chrome per session
pub struct ChromeSessionFactory {
    proxies: Vec<String>,
    next_proxy: AtomicUsize,
}

impl ChromeSessionFactory {
    pub fn new() -> Self {
        Self::with_proxies(Vec::new())
    }

    /// Sessions without an explicit proxy get the next one from `proxies`
    pub fn with_proxies(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            next_proxy: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_proxies(config.active_proxies().to_vec())
    }

    fn next_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.next_proxy.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[index].clone())
    }
}

impl Default for ChromeSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn acquire(&self, stealth: &StealthConfig) -> Result<Box<dyn BrowserSession>> {
        let mut stealth = stealth.clone();
        if stealth.proxy.is_none() {
            stealth.proxy = self.next_proxy();
        }

        info!("Launching headless Chrome...");
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&stealth))
            .await
            .map_err(|e| ScrapeError::SessionInit(format!("Browser launch task failed: {}", e)))??;

        info!("Session initialized (profile {})", session.label);
        Ok(Box::new(session))
    }
}

/// Resources of one Chrome session, in acquisition order
struct ChromeParts {
    profile_dir: Option<TempDir>,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeParts {
    /// Close tab, then browser, then remove the profile. Missing parts are skipped.
    fn teardown(mut self, label: &str) {
        if let Some(tab) = self.tab.take() {
            if let Err(e) = tab.close(false) {
                debug!("Closing tab of {} failed: {}", label, e);
            }
        }

        // Dropping the last handle kills the Chrome process
        drop(self.browser.take());

        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = dir.close() {
                warn!("Could not remove browser profile of {}: {}", label, e);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.profile_dir.is_none() && self.browser.is_none() && self.tab.is_none()
    }
}

/// Headless Chrome session with its own throwaway profile directory
pub struct ChromeSession {
    label: String,
    parts: Option<ChromeParts>,
    load_budget: Duration,
}

impl ChromeSession {
    /// Blocking: profile dir, browser, tab, then stealth settings.
    /// Whatever was created is torn down again if a later step fails.
    fn launch(stealth: &StealthConfig) -> Result<Self> {
        let profile_dir = tempfile::Builder::new()
            .prefix("listing-scout-")
            .tempdir()
            .map_err(|e| ScrapeError::SessionInit(format!("Failed to create browser profile: {}", e)))?;

        let label = profile_dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "listing-scout".to_string());

        let mut session = Self {
            label,
            parts: Some(ChromeParts {
                profile_dir: Some(profile_dir),
                browser: None,
                tab: None,
            }),
            load_budget: stealth.page_load_budget(),
        };

        if let Err(e) = session.open(stealth) {
            warn!("Session init failed, releasing partial resources: {}", e);
            session.teardown_now();
            return Err(e);
        }

        Ok(session)
    }

    fn open(&mut self, stealth: &StealthConfig) -> Result<()> {
        let parts = self
            .parts
            .as_mut()
            .ok_or_else(|| ScrapeError::SessionInit("Session already released".to_string()))?;

        let profile_path = parts
            .profile_dir
            .as_ref()
            .map(|dir| dir.path().to_path_buf());

        let extra_args = stealth.launch_args();
        let options = LaunchOptions::default_builder()
            .headless(stealth.headless)
            .sandbox(stealth.sandbox)
            .window_size(Some((stealth.viewport.width, stealth.viewport.height)))
            .user_data_dir(profile_path)
            .proxy_server(stealth.proxy.as_deref())
            .idle_browser_timeout(stealth.idle_timeout)
            .args(extra_args.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| ScrapeError::SessionInit(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(options)
            .map_err(|e| ScrapeError::SessionInit(format!("Failed to launch Chrome browser: {}", e)))?;
        let browser = parts.browser.insert(browser);

        let tab = browser
            .new_tab()
            .map_err(|e| ScrapeError::SessionInit(format!("Failed to open tab: {}", e)))?;
        let tab = parts.tab.insert(tab);

        tab.set_default_timeout(stealth.request_timeout);
        tab.set_user_agent(
            &stealth.user_agent,
            Some(stealth.accept_language.as_str()),
            Some(stealth.platform.as_str()),
        )
        .map_err(|e| ScrapeError::SessionInit(format!("Failed to set user agent: {}", e)))?;

        if stealth.disable_automation_flags {
            tab.enable_stealth_mode()
                .map_err(|e| ScrapeError::SessionInit(format!("Failed to enable stealth mode: {}", e)))?;
        }

        Ok(())
    }

    fn teardown_now(&mut self) {
        if let Some(parts) = self.parts.take() {
            parts.teardown(&self.label);
        }
    }

    fn tab(&self) -> Option<Arc<Tab>> {
        self.parts.as_ref().and_then(|p| p.tab.clone())
    }
}

fn load_page(tab: &Tab, url: &str) -> Result<PageContent> {
    tab.navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|e| ScrapeError::navigation(url, e))?;

    let html = tab.get_content().map_err(|e| ScrapeError::navigation(url, e))?;
    if html.trim().is_empty() {
        return Err(ScrapeError::navigation(url, "empty document"));
    }
    if looks_blocked(&html) {
        return Err(ScrapeError::navigation(url, "anti-bot block page"));
    }

    Ok(PageContent {
        requested_url: url.to_string(),
        final_url: tab.get_url(),
        html,
    })
}

#[async_trait]
impl Navigator for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<PageContent> {
        let tab = self
            .tab()
            .ok_or_else(|| ScrapeError::navigation(url, "session already released"))?;

        debug!("Navigating {} to {}", self.label, url);
        let target = url.to_string();
        let loader = Arc::clone(&tab);
        let load = tokio::task::spawn_blocking(move || load_page(&loader, &target));

        await_load(url, load, self.load_budget, move || {
            if let Err(e) = tab.stop_loading() {
                debug!("Stopping page load failed: {}", e);
            }
        })
        .await
    }
}

/// Wait up to `budget` for a blocking page load. On timeout `interrupt` runs and
/// the load is still joined, so the tab is idle before the next navigation.
async fn await_load<T, F>(url: &str, mut load: JoinHandle<Result<T>>, budget: Duration, interrupt: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    match tokio::time::timeout(budget, &mut load).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ScrapeError::navigation(url, format!("navigation task failed: {}", e))),
        Err(_) => {
            warn!("Page load of {} exceeded {:?}, stopping it", url, budget);
            if let Err(e) = tokio::task::spawn_blocking(interrupt).await {
                debug!("Interrupt task failed: {}", e);
            }
            if let Err(e) = load.await {
                debug!("Abandoned page load failed: {}", e);
            }
            Err(ScrapeError::navigation(url, "timed out"))
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn release(&mut self) {
        let Some(parts) = self.parts.take() else {
            return;
        };

        let label = self.label.clone();
        if parts.is_empty() {
            info!("Session released ({})", label);
            return;
        }

        let result = tokio::task::spawn_blocking(move || {
            parts.teardown(&label);
            label
        })
        .await;

        match result {
            Ok(label) => info!("Session released ({})", label),
            Err(e) => warn!("Session teardown task failed for {}: {}", self.label, e),
        }
    }

    fn is_released(&self) -> bool {
        self.parts.is_none()
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.parts.is_some() {
            warn!("Session {} dropped without release, tearing down", self.label);
            self.teardown_now();
        }
    }
}
