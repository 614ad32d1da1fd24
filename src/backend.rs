//! Browser-automation backend trait and implementations.
//!
//! A backend launches one isolated browser per request and exposes the small
//! set of page primitives the pipeline needs. Waiting, matching and result
//! shaping are done by the pipeline on top of these primitives.

mod chromium;

pub use chromium::ChromiumBackend;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tracing::debug;

use crate::target::script;

/// Viewport requested for a new browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Opaque handle to the execution context of a nested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub i64);

/// Where an expression is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// The top-level page.
    Page,
    /// A nested frame resolved through [`BrowserSession::content_frame`].
    Frame(FrameHandle),
}

/// Trait for browser backends.
///
/// Each `launch` must start a fresh, isolated browser process. Sessions are
/// never pooled or shared between requests.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Launch a new browser and open a single blank page.
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn BrowserSession>>;
}

/// One browser process with one page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page and wait for the load to finish.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression, awaiting promises, and return its
    /// value by value. `undefined` maps to `Value::Null`.
    async fn evaluate(&self, context: Context, expression: &str) -> Result<Value>;

    /// Resolve the execution context of the iframe matched by `selector`.
    ///
    /// Returns `Ok(None)` when the element is missing or its document has no
    /// execution context yet.
    async fn content_frame(&self, selector: &str) -> Result<Option<FrameHandle>>;

    /// PNG screenshot of the element matched by `selector` on the page.
    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>>;

    /// Expose a page binding and stream the payload of every call to it.
    async fn subscribe(&self, binding: &str) -> Result<BoxStream<'static, String>>;

    /// Gracefully close the browser and reap its process.
    async fn close(&mut self) -> Result<()>;

    /// Kill the browser process without waiting for it to cooperate.
    async fn kill(&mut self);
}

/// Poll until `selector` matches an element in `context`, up to `timeout`.
///
/// Evaluation errors while polling (e.g. a context torn down mid-navigation)
/// count as "not yet". Returns `false` when the deadline passes.
pub async fn wait_for_selector(
    session: &dyn BrowserSession,
    context: Context,
    selector: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let expression = script::selector_exists(selector);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match session.evaluate(context, &expression).await {
            Ok(Value::Bool(true)) => return true,
            Ok(_) => {}
            Err(e) => debug!(selector, error = %e, "Selector poll failed"),
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
