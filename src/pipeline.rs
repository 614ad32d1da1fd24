//! The evaluation pipeline.
//!
//! `Idle -> SessionAcquired -> Bootstrapped -> CodeInjected -> AwaitingCompletion
//! -> Completed -> Extracted -> TornDown`, with any failure jumping straight to
//! `TornDown`. Stages run strictly in order, nothing is retried, and the
//! browser is released on every path before a result is returned.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use tracing::{debug, error, instrument, warn};

use crate::backend::{wait_for_selector, BrowserBackend, BrowserSession, Context, FrameHandle, Viewport};
use crate::completion::CompletionSignal;
use crate::config::Config;
use crate::request::{Capture, ExecutionRequest, ExecutionResult, PipelineError};
use crate::runner::{strategy_for, ExtractionStrategy, FrameScope};
use crate::session::{ExecutionSession, Release, SessionManager};
use crate::target::{
    script, LiveEditorError, COMPLETION_BINDING, EDITOR_SELECTOR, OUTPUT_FRAME_SELECTOR,
};

/// Pipeline progress, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    SessionAcquired,
    Bootstrapped,
    CodeInjected,
    AwaitingCompletion,
    Completed,
    Extracted,
    TornDown,
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = ?*stage, to = ?next, "Pipeline stage");
    *stage = next;
}

/// Runs code-execution requests, one fresh browser per request.
pub struct Runner<B> {
    sessions: SessionManager<B>,
    config: Arc<Config>,
}

impl<B: BrowserBackend> Runner<B> {
    pub fn new(config: Arc<Config>, backend: Arc<B>) -> Self {
        Self {
            sessions: SessionManager::new(backend, config.browser.close_timeout()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluate one request. Never fails: every error is folded into the
    /// returned [`ExecutionResult`].
    #[instrument(skip_all, fields(environment = %request.environment(), code_len = request.code.len()))]
    pub async fn evaluate(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let environment = request.environment();

        if request.code.trim().is_empty() {
            return ExecutionResult::failed(
                environment,
                PipelineError::EmptyCode.user_message(),
                started.elapsed(),
            );
        }

        let strategy = strategy_for(&request.options);
        let code = strategy.prepare_code(&request.code);
        let mut stage = Stage::Idle;

        let viewport = Viewport {
            width: request.width,
            height: request.height,
        };
        let session = match self.sessions.acquire(viewport).await {
            Ok(session) => session,
            Err(e) => {
                let err = PipelineError::Acquisition(e);
                error!(error = %err, "Could not acquire browser session");
                return ExecutionResult::failed(environment, err.user_message(), started.elapsed());
            }
        };
        advance(&mut stage, Stage::SessionAcquired);

        // The session stays outside the deadline so it can still be killed
        // once the deadline fires.
        let deadline = self.config.run.timeout();
        let outcome = tokio::time::timeout(
            deadline,
            self.run_stages(&session, &request, strategy.as_ref(), &code, &mut stage),
        )
        .await
        .unwrap_or(Err(PipelineError::Timeout(deadline)));

        let failed_at = stage;
        let release = if matches!(outcome, Err(PipelineError::Timeout(_))) {
            Release::Kill
        } else {
            Release::Graceful
        };
        session.release(release).await;
        advance(&mut stage, Stage::TornDown);

        let elapsed = started.elapsed();
        match outcome {
            Ok((errors, capture)) => {
                debug!(errors = errors.len(), ?elapsed, "Evaluation completed");
                ExecutionResult::completed(environment, &errors, capture, elapsed)
            }
            Err(err) => {
                match &err {
                    PipelineError::Timeout(_) => {
                        warn!(stage = ?failed_at, error = %err, "Evaluation timed out");
                    }
                    PipelineError::Unexpected(_) | PipelineError::CompletionClosed => {
                        error!(stage = ?failed_at, error = ?err, "Evaluation failed");
                    }
                    _ => warn!(stage = ?failed_at, error = %err, "Evaluation failed"),
                }
                ExecutionResult::failed(environment, err.user_message(), elapsed)
            }
        }
    }

    async fn run_stages(
        &self,
        session: &ExecutionSession,
        request: &ExecutionRequest,
        strategy: &dyn ExtractionStrategy,
        code: &str,
        stage: &mut Stage,
    ) -> Result<(Vec<LiveEditorError>, Capture), PipelineError> {
        let browser = session.browser();

        let (frame, signal) = self.bootstrap(browser, request, code).await?;
        advance(stage, Stage::Bootstrapped);

        let scope = FrameScope {
            session: browser,
            frame,
            config: &self.config,
            width: request.width,
            height: request.height,
        };

        strategy.setup(&scope).await?;
        browser
            .evaluate(Context::Page, &script::set_editor_value(EDITOR_SELECTOR, code))
            .await
            .context("Failed to set editor value")?;
        advance(stage, Stage::CodeInjected);

        advance(stage, Stage::AwaitingCompletion);
        let errors = signal.wait(self.config.run.completion_timeout()).await?;
        advance(stage, Stage::Completed);

        let capture = strategy.teardown(&scope).await?;
        advance(stage, Stage::Extracted);

        Ok((errors, capture))
    }

    /// Navigate, wait for the landmarks, resolve the output frame and start
    /// listening for completion before any user code reaches the editor.
    async fn bootstrap(
        &self,
        browser: &dyn BrowserSession,
        request: &ExecutionRequest,
        code: &str,
    ) -> Result<(FrameHandle, CompletionSignal), PipelineError> {
        let target = &self.config.target;
        let url = request
            .environment()
            .page_url(&target.base_url, request.width, request.height);
        browser.goto(&url).await?;

        let timeout = target.selector_timeout();
        let poll = target.poll_interval();
        if !wait_for_selector(browser, Context::Page, EDITOR_SELECTOR, timeout, poll).await {
            return Err(PipelineError::EditorNotFound);
        }
        if !wait_for_selector(browser, Context::Page, OUTPUT_FRAME_SELECTOR, timeout, poll).await {
            return Err(PipelineError::OutputFrameNotFound);
        }

        let frame = self.resolve_output_frame(browser).await?;

        let events = browser
            .subscribe(COMPLETION_BINDING)
            .await
            .context("Failed to subscribe to completion events")?;
        browser
            .evaluate(
                Context::Page,
                &script::install_completion_listener(COMPLETION_BINDING),
            )
            .await
            .context("Failed to install completion listener")?;

        Ok((frame, CompletionSignal::watch(events, code.to_owned())))
    }

    /// The frame element can exist before its document has an execution
    /// context, so resolution is retried until the selector deadline.
    async fn resolve_output_frame(
        &self,
        browser: &dyn BrowserSession,
    ) -> Result<FrameHandle, PipelineError> {
        let deadline = tokio::time::Instant::now() + self.config.target.selector_timeout();
        loop {
            if let Some(frame) = browser.content_frame(OUTPUT_FRAME_SELECTOR).await? {
                return Ok(frame);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::FrameUnresolved);
            }
            tokio::time::sleep(self.config.target.poll_interval()).await;
        }
    }
}
