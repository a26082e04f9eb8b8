//! Browser session lifecycle.
//!
//! One retrieval call owns exactly one [`ScopedSession`]: one Chromium
//! process, one page, the CDP handler task that pumps its event loop, and an
//! ordered registry of listener tasks. `release()` tears all of that down in
//! a fixed order — listeners first (newest to oldest, aborted *and* awaited),
//! then the page, then the browser, then a bounded drain of the handler task.
//! A listener callback can therefore never run against a closed page, which
//! is the whole point of this module.
//!
//! [`SessionSurface`] / [`SessionFactory`] are the seams the auth and locate
//! stages (and the tests) work against; [`BrowserSessionManager`] is the real
//! chromiumoxide-backed factory.

use crate::browser;
use crate::core::config::RetrieverConfig;
use crate::error::RetrievalError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{self, EventResponseReceived};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Listener registry ────────────────────────────────────────────────────────

/// Ordered set of listener task handles owned by one session.
///
/// Invariant: every handle tracked here is deregistered before the page or
/// browser it references is closed. Deregistration is abort-then-await, in
/// reverse-registration order, so a callback that is mid-poll finishes (or is
/// cancelled at its next await point) before teardown proceeds.
#[derive(Default)]
pub struct ListenerRegistry {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ListenerRegistry {
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        debug!("listener '{}' registered", name);
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Deregister every listener, newest first. Returns the names in
    /// deregistration order. After this resolves, no tracked task is running.
    pub async fn drain(&mut self) -> Vec<&'static str> {
        let mut order = Vec::with_capacity(self.handles.len());
        while let Some((name, handle)) = self.handles.pop() {
            handle.abort();
            // Await the join so the task has actually stopped, not merely
            // been asked to. Cancellation errors are the expected outcome.
            let _ = handle.await;
            debug!("listener '{}' deregistered", name);
            order.push(name);
        }
        order
    }

    /// Synchronous best-effort abort for `Drop` paths, where we cannot await.
    fn abort_all(&mut self) {
        while let Some((name, handle)) = self.handles.pop() {
            handle.abort();
            debug!("listener '{}' aborted (drop path)", name);
        }
    }
}

// ── Session seams ────────────────────────────────────────────────────────────

/// The page operations the auth and locate stages need from a live session.
///
/// The real implementation is [`ScopedSession`]; tests script one of these to
/// exercise the pipeline without a browser.
#[async_trait]
pub trait SessionSurface: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Evaluate a JS expression in the page, awaiting promises, and return
    /// the result by value.
    async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value>;
    async fn current_url(&mut self) -> Result<String>;
    /// URLs of media-typed network responses observed so far by the session's
    /// response listener. Used by the locator as a fallback when the DOM
    /// never exposes a download affordance.
    async fn observed_media(&mut self) -> Vec<String>;
    /// Tear the session down. Safe to call exactly once; any later call is a
    /// no-op and never fails.
    async fn release(&mut self);
}

/// Produces one fresh, exclusively-owned session per retrieval call.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: SessionSurface + Send;
    /// Never returns a half-initialized session: any failure after the
    /// browser process starts closes it before the error is returned.
    async fn acquire(&self) -> Result<Self::Session, RetrievalError>;
}

// ── ScopedSession ────────────────────────────────────────────────────────────

/// A live headless-browser session, exclusively owned by one retrieval call.
pub struct ScopedSession {
    browser: Option<Browser>,
    page: Option<Page>,
    cdp_handler: Option<JoinHandle<()>>,
    listeners: ListenerRegistry,
    media_sink: Arc<Mutex<Vec<String>>>,
    handler_drain_timeout: std::time::Duration,
    released: bool,
}

impl ScopedSession {
    /// The live page, or `None` once the session has been released.
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn page_mut(&mut self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| anyhow!("session already released"))
    }
}

#[async_trait]
impl SessionSurface for ScopedSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self.page_mut()?;
        page.goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        page.wait_for_navigation()
            .await
            .with_context(|| format!("load of {url} did not complete"))?;
        Ok(())
    }

    async fn evaluate(&mut self, js: &str) -> Result<serde_json::Value> {
        let page = self.page_mut()?;
        let params = EvaluateParams::builder()
            .expression(js)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!("evaluate params: {}", e))?;
        let result = page
            .evaluate(params)
            .await
            .context("page evaluation failed")?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn current_url(&mut self) -> Result<String> {
        let page = self.page_mut()?;
        page.url()
            .await
            .context("could not read page url")?
            .ok_or_else(|| anyhow!("page has no url"))
    }

    async fn observed_media(&mut self) -> Vec<String> {
        match self.media_sink.lock() {
            Ok(sink) => sink.clone(),
            Err(_) => Vec::new(),
        }
    }

    async fn release(&mut self) {
        if self.released {
            debug!("release() called again — no-op");
            return;
        }
        self.released = true;

        // 1. Listeners go first, newest to oldest, and are awaited so no
        //    callback is still in flight when the page starts closing.
        let order = self.listeners.drain().await;
        if !order.is_empty() {
            debug!("deregistered listeners: {:?}", order);
        }

        // 2. Page, then browser process.
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("page close error (non-fatal): {}", e);
            }
        }
        if let Some(mut b) = self.browser.take() {
            if let Err(e) = b.close().await {
                warn!("browser close error (non-fatal): {}", e);
            }
        }

        // 3. The handler task ends once the browser connection drops; give it
        //    a bounded window, then abort rather than hang the release.
        if let Some(mut handler) = self.cdp_handler.take() {
            match tokio::time::timeout(self.handler_drain_timeout, &mut handler).await {
                Ok(_) => debug!("CDP handler drained"),
                Err(_) => {
                    warn!("CDP handler did not drain in time — aborting");
                    handler.abort();
                    let _ = handler.await;
                }
            }
        }

        info!("browser session released");
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // An abandoned call (future dropped mid-stage) still must not leak a
        // Chromium process. Drop cannot await, so abort listeners
        // synchronously and hand the close to the runtime if one is live.
        warn!("session dropped without release() — running best-effort teardown");
        self.listeners.abort_all();
        if let Some(handler) = self.cdp_handler.take() {
            handler.abort();
        }
        let page = self.page.take();
        let browser = self.browser.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(page) = page {
                    let _ = page.close().await;
                }
                if let Some(mut b) = browser {
                    let _ = b.close().await;
                }
            });
        }
    }
}

// ── BrowserSessionManager ────────────────────────────────────────────────────

/// Launches one disposable headless Chromium per `acquire()`.
///
/// Each session gets its own process and profile — nothing is shared between
/// concurrent retrieval calls, so one call's teardown cannot touch another's
/// in-flight session.
pub struct BrowserSessionManager {
    config: RetrieverConfig,
}

impl BrowserSessionManager {
    pub fn new(config: RetrieverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionManager {
    type Session = ScopedSession;

    async fn acquire(&self) -> Result<ScopedSession, RetrievalError> {
        let exe = match &self.config.chrome_executable {
            Some(exe) => exe.clone(),
            None => browser::find_chrome_executable().ok_or_else(|| {
                RetrievalError::SessionLaunch(
                    "no Chromium-family browser found — install Chrome/Chromium or set \
                     PROTECT_CHROME_EXECUTABLE"
                        .to_string(),
                )
            })?,
        };

        let config = browser::build_headless_config(
            &exe,
            self.config.viewport_width,
            self.config.viewport_height,
        )
        .map_err(|e| RetrievalError::SessionLaunch(e.to_string()))?;

        info!("🚀 launching headless session ({})", exe);
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RetrievalError::SessionLaunch(format!("launch ({exe}): {e}")))?;

        let cdp_handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        // Everything past this point must clean up the live process on
        // failure — acquire() never hands back a half-initialized session.
        let init: Result<(Page, ListenerRegistry, Arc<Mutex<Vec<String>>>)> = async {
            let page = browser
                .new_page("about:blank")
                .await
                .context("failed to open page")?;

            page.execute(network::EnableParams::default())
                .await
                .context("failed to enable network events")?;

            let mut listeners = ListenerRegistry::default();
            let media_sink = Arc::new(Mutex::new(Vec::new()));

            let mut responses = page
                .event_listener::<EventResponseReceived>()
                .await
                .context("failed to subscribe to network responses")?;
            let sink = Arc::clone(&media_sink);
            let sniffer = tokio::spawn(async move {
                while let Some(event) = responses.next().await {
                    let mime = event.response.mime_type.to_ascii_lowercase();
                    let url = event.response.url.clone();
                    if mime.starts_with("video/") || url.contains(".mp4") {
                        debug!("media response observed: {}", url);
                        if let Ok(mut sink) = sink.lock() {
                            sink.push(url);
                        }
                    }
                }
            });
            listeners.track("network-media-sniffer", sniffer);

            Ok((page, listeners, media_sink))
        }
        .await;

        match init {
            Ok((page, listeners, media_sink)) => Ok(ScopedSession {
                browser: Some(browser),
                page: Some(page),
                cdp_handler: Some(cdp_handler),
                listeners,
                media_sink,
                handler_drain_timeout: self.config.handler_drain_timeout,
                released: false,
            }),
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    warn!("browser close after failed init: {}", close_err);
                }
                cdp_handler.abort();
                let _ = cdp_handler.await;
                Err(RetrievalError::SessionLaunch(format!("{e:#}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Listeners must come down newest-first, and drain must leave every
    /// tracked task actually finished, not merely abort-requested.
    #[tokio::test]
    async fn registry_drains_in_reverse_registration_order() {
        let mut registry = ListenerRegistry::default();
        for name in ["first", "second", "third"] {
            registry.track(name, tokio::spawn(futures::future::pending::<()>()));
        }
        assert_eq!(registry.len(), 3);

        let order = registry.drain().await;
        assert_eq!(order, vec!["third", "second", "first"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registry_drain_is_idempotent() {
        let mut registry = ListenerRegistry::default();
        registry.track("only", tokio::spawn(async {}));
        assert_eq!(registry.drain().await, vec!["only"]);
        assert!(registry.drain().await.is_empty());
    }

    #[tokio::test]
    async fn drain_waits_until_callbacks_have_stopped() {
        let marker = Arc::new(());
        let held = Arc::clone(&marker);
        let mut registry = ListenerRegistry::default();
        registry.track(
            "pending",
            tokio::spawn(async move {
                let _held = held;
                futures::future::pending::<()>().await;
            }),
        );
        registry.drain().await;
        // The task closure has been dropped, so it no longer holds its Arc —
        // proof the task terminated before drain returned.
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
