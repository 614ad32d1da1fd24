//! Request-scoped browser sessions.
//!
//! Every evaluation acquires its own browser through [`SessionManager::acquire`]
//! and must give it back through [`ExecutionSession::release`]. A session that
//! is dropped without being released (the owning task was cancelled, or a
//! panic unwound through it) is hard-killed from a background task so a
//! browser process never outlives its request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BrowserBackend, BrowserSession, Context, FrameHandle, Viewport};

/// How a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Ask the browser to close within the close timeout, falling back to a
    /// kill if that fails or stalls.
    Graceful,
    /// Kill the process outright. Used after a deadline expired, when the
    /// page may be spinning in user code and cannot be trusted to cooperate.
    Kill,
}

/// Launches one isolated browser per request.
pub struct SessionManager<B> {
    backend: Arc<B>,
    close_timeout: Duration,
    next_id: AtomicU64,
}

impl<B: BrowserBackend> SessionManager<B> {
    pub fn new(backend: Arc<B>, close_timeout: Duration) -> Self {
        Self {
            backend,
            close_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Launch a fresh browser and page for one request.
    ///
    /// No pooling: a runaway program in one request can never affect another.
    /// On failure nothing is left running.
    pub async fn acquire(&self, viewport: Viewport) -> Result<ExecutionSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let browser = self.backend.launch(viewport).await?;
        debug!(session = id, "Acquired browser session");
        Ok(ExecutionSession {
            id,
            browser,
            close_timeout: self.close_timeout,
            released: false,
        })
    }
}

/// A browser exclusively owned by one pipeline invocation.
pub struct ExecutionSession {
    id: u64,
    browser: Box<dyn BrowserSession>,
    close_timeout: Duration,
    released: bool,
}

impl ExecutionSession {
    /// Session identifier, unique per manager.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The underlying browser.
    pub fn browser(&self) -> &dyn BrowserSession {
        self.browser.as_ref()
    }

    /// Tear the browser down. Consumes the session, so it runs exactly once.
    ///
    /// Failures are logged and swallowed: they must not mask the result of
    /// the evaluation that owned the session.
    pub async fn release(mut self, mode: Release) {
        self.released = true;
        let mut browser = self.detach();

        match mode {
            Release::Graceful => {
                let closed = tokio::time::timeout(self.close_timeout, browser.close()).await;
                match closed {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(session = self.id, error = %e, "Graceful close failed, killing browser");
                        browser.kill().await;
                    }
                    Err(_) => {
                        warn!(
                            session = self.id,
                            timeout = ?self.close_timeout,
                            "Graceful close timed out, killing browser"
                        );
                        browser.kill().await;
                    }
                }
            }
            Release::Kill => browser.kill().await,
        }

        debug!(session = self.id, ?mode, "Released browser session");
    }

    /// Take the browser out, leaving an inert placeholder behind.
    fn detach(&mut self) -> Box<dyn BrowserSession> {
        std::mem::replace(&mut self.browser, Box::new(Detached))
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut browser = self.detach();

        info!(session = self.id, "Session dropped without release, killing browser");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { browser.kill().await });
            }
            Err(_) => warn!(session = self.id, "No runtime available to kill browser"),
        }
    }
}

/// Stand-in left in a session whose browser has been handed off for teardown.
struct Detached;

#[async_trait]
impl BrowserSession for Detached {
    async fn goto(&self, _url: &str) -> Result<()> {
        anyhow::bail!("Browser session already released")
    }

    async fn evaluate(&self, _context: Context, _expression: &str) -> Result<Value> {
        anyhow::bail!("Browser session already released")
    }

    async fn content_frame(&self, _selector: &str) -> Result<Option<FrameHandle>> {
        anyhow::bail!("Browser session already released")
    }

    async fn screenshot_element(&self, _selector: &str) -> Result<Vec<u8>> {
        anyhow::bail!("Browser session already released")
    }

    async fn subscribe(&self, _binding: &str) -> Result<BoxStream<'static, String>> {
        anyhow::bail!("Browser session already released")
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn kill(&mut self) {}
}
