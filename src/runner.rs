//! Run-type adapters.
//!
//! The pipeline is written once against [`ExtractionStrategy`]; each run
//! environment supplies its own code preparation, pre-injection setup inside
//! the output frame, and post-completion capture.

mod pjs;
mod sql;
mod webpage;

pub use pjs::PjsStrategy;
pub use sql::SqlStrategy;
pub use webpage::{wrap_boilerplate, WebpageStrategy};

use async_trait::async_trait;

use crate::backend::{BrowserSession, FrameHandle};
use crate::config::Config;
use crate::request::{Capture, Image, ImageFormat, PipelineError, RunOptions};
use crate::target::OUTPUT_FRAME_SELECTOR;

/// Everything an adapter may touch once the page is bootstrapped.
pub struct FrameScope<'a> {
    pub session: &'a dyn BrowserSession,
    /// Execution context of the output frame.
    pub frame: FrameHandle,
    pub config: &'a Config,
    pub width: u32,
    pub height: u32,
}

/// Per-environment behaviour plugged into the generic pipeline.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Source actually written into the editor.
    fn prepare_code(&self, code: &str) -> String {
        code.to_owned()
    }

    /// Runs after bootstrap, before the code is injected.
    async fn setup(&self, _scope: &FrameScope<'_>) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Runs once the output frame reported completion.
    async fn teardown(&self, scope: &FrameScope<'_>) -> Result<Capture, PipelineError>;
}

/// Pick the adapter for a request's options.
pub fn strategy_for(options: &RunOptions) -> Box<dyn ExtractionStrategy> {
    match options {
        RunOptions::ProcessingJs(opts) => Box::new(PjsStrategy::new(opts.clone())),
        RunOptions::Webpage(opts) => Box::new(WebpageStrategy::new(opts.clone())),
        RunOptions::Sql => Box::new(SqlStrategy),
    }
}

/// Screenshot of the whole output frame, as rendered in the page.
async fn screenshot_output_frame(scope: &FrameScope<'_>) -> Result<Capture, PipelineError> {
    let bytes = scope
        .session
        .screenshot_element(OUTPUT_FRAME_SELECTOR)
        .await?;
    Ok(Capture {
        image: Some(Image {
            format: ImageFormat::Png,
            bytes,
        }),
        logs: None,
    })
}
