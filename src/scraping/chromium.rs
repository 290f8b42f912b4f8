//! Headless Chromium session driven over the DevTools protocol.
//!
//! One browser process and one tab per run. Every request the tab makes is
//! paused by the `Fetch` domain and either continued or failed according to
//! its resource type, so images, stylesheets, fonts and media never load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::scraping::error::ScrapeError;
use crate::scraping::navigator::{LoadedPage, Navigator, ResourceKind};

const SELECTOR_POLL: Duration = Duration::from_millis(100);

pub fn resource_kind(resource_type: &ResourceType) -> ResourceKind {
    match resource_type {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Media => ResourceKind::Media,
        _ => ResourceKind::Other,
    }
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    interceptor: JoinHandle<()>,
    profile_dir: PathBuf,
}

pub struct ChromiumNavigator {
    page: Page,
    timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl ChromiumNavigator {
    /// Start a headless browser with its own throwaway profile.
    ///
    /// Without `executable`, the usual install locations are searched.
    pub async fn launch(user_agent: &str, timeout: Duration, executable: Option<&Path>) -> Result<Self, ScrapeError> {
        let profile_dir = std::env::temp_dir().join(format!("ausbildung-scraper-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .request_timeout(timeout)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--lang=de-DE")
            .arg(format!("--user-agent={user_agent}"));
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::BrowserInit(format!("Invalid browser config: {e}")))?;

        let (mut browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::BrowserInit(format!("Failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    tracing::trace!("CDP handler: {e}");
                }
            }
        });

        let (page, interceptor) = match open_intercepted_page(&browser).await {
            Ok(opened) => opened,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(ScrapeError::BrowserInit(format!("Failed to open tab: {e}")));
            }
        };

        tracing::debug!("Browser session ready (timeout {}ms)", timeout.as_millis());
        Ok(Self {
            page,
            timeout,
            session: Mutex::new(Some(Session {
                browser,
                handler,
                interceptor,
                profile_dir,
            })),
        })
    }

    fn navigation_error(url: &str, e: impl std::fmt::Display) -> ScrapeError {
        ScrapeError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        }
    }

    /// Poll for `selector` until it matches or `deadline` passes.
    async fn wait_for_selector(&self, selector: &str, deadline: Instant) -> bool {
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return true;
            }
            if Instant::now() + SELECTOR_POLL >= deadline {
                tracing::debug!("Selector {selector:?} did not appear before the timeout");
                return false;
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }
}

async fn open_intercepted_page(browser: &Browser) -> Result<(Page, JoinHandle<()>), CdpError> {
    let page = browser.new_page("about:blank").await?;

    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let intercept_page = page.clone();
    let interceptor = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let kind = resource_kind(&event.resource_type);
            let outcome = if kind.is_blocked() {
                intercept_page
                    .execute(FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient))
                    .await
                    .map(drop)
            } else {
                intercept_page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(drop)
            };
            if let Err(e) = outcome {
                tracing::debug!("Failed to resolve {} request {}: {e}", kind.as_str(), event.request.url);
            }
        }
    });

    if let Err(e) = page.execute(FetchEnableParams::default()).await {
        interceptor.abort();
        return Err(e);
    }
    Ok((page, interceptor))
}

#[async_trait]
impl Navigator for ChromiumNavigator {
    async fn goto(&self, url: &str, wait_for: Option<&str>) -> Result<LoadedPage, ScrapeError> {
        if self.session.lock().await.is_none() {
            return Err(Self::navigation_error(url, "browser session already closed"));
        }

        let deadline = Instant::now() + self.timeout;
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(Self::navigation_error(url, e)),
            Err(_) => {
                return Err(ScrapeError::Timeout {
                    url: url.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }

        if let Some(selector) = wait_for {
            self.wait_for_selector(selector, deadline).await;
        }

        let html: String = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| Self::navigation_error(url, e))?
            .into_value()
            .map_err(|e| Self::navigation_error(url, e))?;

        let final_url = match self.page.url().await {
            Ok(Some(current)) => Url::parse(&current).ok(),
            _ => None,
        };
        let final_url = match final_url {
            Some(u) => u,
            None => Url::parse(url).map_err(|e| Self::navigation_error(url, e))?,
        };

        Ok(LoadedPage { url: final_url, html })
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.interceptor.abort();
        let closed = session
            .browser
            .close()
            .await
            .map(drop)
            .map_err(|e| ScrapeError::Session(format!("Failed to close Chromium: {e}")));
        if let Err(e) = session.browser.wait().await {
            tracing::debug!("Waiting for Chromium to exit: {e}");
        }
        session.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&session.profile_dir).await {
            tracing::debug!("Leaving profile {}: {e}", session.profile_dir.display());
        }

        tracing::debug!("Browser session closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::extract::PageDocument;
    use crate::scraping::navigator::DEFAULT_USER_AGENT;

    #[test]
    fn heavy_cdp_resource_types_are_blocked() {
        for blocked in [ResourceType::Image, ResourceType::Stylesheet, ResourceType::Font, ResourceType::Media] {
            assert!(resource_kind(&blocked).is_blocked(), "{blocked:?}");
        }
        for allowed in [ResourceType::Document, ResourceType::Script, ResourceType::Xhr, ResourceType::Fetch] {
            assert!(!resource_kind(&allowed).is_blocked(), "{allowed:?}");
        }
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn renders_contact_written_by_script() {
        let nav = ChromiumNavigator::launch(DEFAULT_USER_AGENT, Duration::from_secs(15), None)
            .await
            .expect("failed to launch Chromium");

        let html = "<html><body><h1>Koch</h1><div id='c'></div><script>\
            setTimeout(function () { var a = document.createElement('a'); a.className = 'kontakt'; \
            a.textContent = 'bewerbung' + String.fromCharCode(64) + 'gasthof-post.de'; \
            document.getElementById('c').appendChild(a); }, 50);</script></body></html>";
        let url = format!("data:text/html,{}", html.replace('#', "%23").replace(' ', "%20"));

        let page = nav.goto(&url, Some("#c a.kontakt")).await.expect("navigation failed");
        assert!(page.html.contains("bewerbung@gasthof-post.de"));
        assert!(PageDocument::parse(&page).visible_text().contains("bewerbung@gasthof-post.de"));

        nav.close().await.expect("close failed");
        nav.close().await.expect("second close is a no-op");
        assert!(nav.goto(&url, None).await.is_err());
    }
}
