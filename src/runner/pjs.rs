//! Processing.js adapter.
//!
//! Optionally disables the loop protector before injection. After completion
//! it waits for the requested delay, captures the canvas (one frame, or a
//! timed sequence encoded as a GIF) and scrapes the console lines.

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::{ExtractionStrategy, FrameScope};
use crate::backend::{wait_for_selector, Context};
use crate::capture::{decode_data_url, encode_gif, GifSettings};
use crate::request::{Capture, Image, ImageFormat, PipelineError, PjsOptions};
use crate::target::{script, CONSOLE_LINES_SELECTOR, OUTPUT_CANVAS_SELECTOR};

#[derive(Debug, Clone)]
pub struct PjsStrategy {
    options: PjsOptions,
}

impl PjsStrategy {
    pub const fn new(options: PjsOptions) -> Self {
        Self { options }
    }

    async fn capture_canvas(&self, scope: &FrameScope<'_>) -> Result<Image, PipelineError> {
        let found = wait_for_selector(
            scope.session,
            Context::Frame(scope.frame),
            OUTPUT_CANVAS_SELECTOR,
            scope.config.target.selector_timeout(),
            scope.config.target.poll_interval(),
        )
        .await;
        if !found {
            return Err(PipelineError::CanvasNotFound);
        }

        if self.options.animated {
            let bytes = capture_animation(scope).await?;
            Ok(Image {
                format: ImageFormat::Gif,
                bytes,
            })
        } else {
            let bytes = sample_canvas(scope).await?;
            Ok(Image {
                format: ImageFormat::Png,
                bytes,
            })
        }
    }
}

#[async_trait]
impl ExtractionStrategy for PjsStrategy {
    async fn setup(&self, scope: &FrameScope<'_>) -> Result<(), PipelineError> {
        if !self.options.loop_protector {
            debug!("Disabling loop protector");
            scope
                .session
                .evaluate(Context::Frame(scope.frame), script::DISABLE_LOOP_PROTECTOR)
                .await
                .context("Failed to disable loop protector")?;
        }
        Ok(())
    }

    async fn teardown(&self, scope: &FrameScope<'_>) -> Result<Capture, PipelineError> {
        if !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }

        let image = if self.options.canvas {
            Some(self.capture_canvas(scope).await?)
        } else {
            None
        };

        let logs = scrape_console(scope).await?;
        Ok(Capture {
            image,
            logs: Some(logs),
        })
    }
}

/// Current canvas contents as PNG bytes.
async fn sample_canvas(scope: &FrameScope<'_>) -> Result<Vec<u8>, PipelineError> {
    let value = scope
        .session
        .evaluate(
            Context::Frame(scope.frame),
            &script::canvas_data_url(OUTPUT_CANVAS_SELECTOR),
        )
        .await
        .context("Failed to read canvas")?;

    match value {
        Value::String(url) => Ok(decode_data_url(&url)?),
        _ => Err(PipelineError::CanvasNotFound),
    }
}

/// Sample the canvas at the configured frame rate for the configured
/// duration, then encode the frames off the async runtime.
async fn capture_animation(scope: &FrameScope<'_>) -> Result<Vec<u8>, PipelineError> {
    let animation = &scope.config.run.animation;
    let count = animation.frame_count();

    let mut ticker = tokio::time::interval(animation.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        ticker.tick().await;
        frames.push(sample_canvas(scope).await?);
    }
    debug!(frames = frames.len(), "Sampled animation frames");

    let settings = GifSettings {
        width: scope.width,
        height: scope.height,
        fps: animation.fps,
        quality: animation.quality,
    };
    let gif = tokio::task::spawn_blocking(move || encode_gif(&frames, settings))
        .await
        .context("GIF encoder task failed")??;
    Ok(gif)
}

async fn scrape_console(scope: &FrameScope<'_>) -> Result<Vec<String>, PipelineError> {
    let value = scope
        .session
        .evaluate(
            Context::Frame(scope.frame),
            &script::text_contents(CONSOLE_LINES_SELECTOR),
        )
        .await
        .context("Failed to read console output")?;
    let lines = serde_json::from_value(value).context("Console output was not a list of strings")?;
    Ok(lines)
}
