//! Chrome DevTools Protocol backend.
//!
//! Launches a dedicated headless Chrome per session through chromiumoxide.
//! The CDP handler is driven on its own task for the lifetime of the session
//! and aborted on close/kill.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::GetFrameOwnerParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{
    AddBindingParams, EvaluateParams, EventBindingCalled, ExecutionContextId,
};
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{BrowserBackend, BrowserSession, Context, FrameHandle, Viewport};
use crate::config::BrowserSettings;

/// Arguments that keep the output iframe in the page's renderer so its
/// execution context is visible to the page target.
const SITE_ISOLATION_ARGS: &[&str] = &[
    "--disable-site-isolation-trials",
    "--disable-features=IsolateOrigins,site-per-process",
];

/// Backend that launches headless Chrome via the DevTools protocol.
#[derive(Debug, Default, Clone)]
pub struct ChromiumBackend {
    settings: BrowserSettings,
}

impl ChromiumBackend {
    /// Create a new chromium backend.
    #[must_use]
    pub const fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, viewport: Viewport) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .launch_timeout(self.settings.launch_timeout())
            .request_timeout(self.settings.request_timeout())
            .viewport(CdpViewport {
                width: viewport.width,
                height: viewport.height,
                ..CdpViewport::default()
            });

        if !self.settings.headless {
            builder = builder.with_head();
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.settings.executable {
            builder = builder.chrome_executable(path);
        }
        if self.settings.disable_site_isolation {
            builder = builder.args(SITE_ISOLATION_ARGS.iter().copied());
        }
        builder = builder.args(self.settings.args.iter().map(String::as_str));

        builder.build().map_err(anyhow::Error::msg)
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    #[instrument(skip(self), fields(width = viewport.width, height = viewport.height))]
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn BrowserSession>> {
        let config = self.browser_config(viewport)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        // The connection only makes progress while the handler is polled
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let mut session = ChromiumSession {
            browser,
            page: None,
            handler_task,
        };

        match session.browser.new_page("about:blank").await {
            Ok(page) => {
                session.page = Some(page);
                debug!("Browser launched");
                Ok(Box::new(session))
            }
            Err(e) => {
                // Never leave a half-built session running
                session.kill().await;
                Err(anyhow::Error::new(e).context("Failed to open page"))
            }
        }
    }
}

/// One Chrome process and its single page.
pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page> {
        self.page.as_ref().context("Page is not open")
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page()?
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn evaluate(&self, context: Context, expression: &str) -> Result<Value> {
        let mut params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true);
        if let Context::Frame(FrameHandle(id)) = context {
            params = params.context_id(ExecutionContextId::new(id));
        }
        let params = params.build().map_err(anyhow::Error::msg)?;

        let result = self
            .page()?
            .evaluate_expression(params)
            .await
            .context("Failed to evaluate expression")?;

        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<FrameHandle>> {
        let page = self.page()?;
        let Ok(element) = page.find_element(selector).await else {
            return Ok(None);
        };

        let main_frame = page.mainframe().await?;
        for frame_id in page.frames().await? {
            if Some(&frame_id) == main_frame.as_ref() {
                continue;
            }
            let owner = match page.execute(GetFrameOwnerParams::new(frame_id.clone())).await {
                Ok(owner) => owner,
                Err(e) => {
                    debug!(error = %e, "Skipping frame without owner");
                    continue;
                }
            };
            if owner.result.backend_node_id != element.backend_node_id {
                continue;
            }
            let context = page.frame_execution_context(frame_id).await?;
            return Ok(context.map(|id| FrameHandle(*id.inner())));
        }

        Ok(None)
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .with_context(|| format!("Could not find element {selector}"))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .context("Failed to capture screenshot")
    }

    async fn subscribe(&self, binding: &str) -> Result<BoxStream<'static, String>> {
        let page = self.page()?;
        page.execute(AddBindingParams::new(binding))
            .await
            .context("Failed to add page binding")?;
        let events = page
            .event_listener::<EventBindingCalled>()
            .await
            .context("Failed to listen for binding calls")?;

        let name = binding.to_string();
        Ok(events
            .filter_map(move |event| {
                let payload = (event.name == name).then(|| event.payload.clone());
                async move { payload }
            })
            .boxed())
    }

    async fn close(&mut self) -> Result<()> {
        self.page = None;
        let closed = self.browser.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "Graceful browser close failed");
        }
        let waited = self.browser.wait().await;
        self.handler_task.abort();
        closed.context("Failed to close browser")?;
        waited.context("Failed to reap browser process")?;
        debug!("Browser closed");
        Ok(())
    }

    async fn kill(&mut self) {
        self.page = None;
        if let Some(Err(e)) = self.browser.kill().await {
            warn!(error = %e, "Failed to kill browser process");
        }
        self.handler_task.abort();
        debug!("Browser killed");
    }
}
