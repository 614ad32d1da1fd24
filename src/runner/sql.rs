//! SQL adapter. The output frame renders result tables, so the frame itself
//! is the capture.

use async_trait::async_trait;

use super::{screenshot_output_frame, ExtractionStrategy, FrameScope};
use crate::request::{Capture, PipelineError};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStrategy;

#[async_trait]
impl ExtractionStrategy for SqlStrategy {
    async fn teardown(&self, scope: &FrameScope<'_>) -> Result<Capture, PipelineError> {
        screenshot_output_frame(scope).await
    }
}
