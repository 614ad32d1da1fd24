//! Request and result types crossing the pipeline boundary.

use std::time::Duration;

use thiserror::Error;

use crate::target::{Environment, LiveEditorError};

pub const NO_CODE_MESSAGE: &str = "No code provided";
pub const INFINITE_LOOP_MESSAGE: &str = "Your javascript is taking too long to run.";
pub const TIMEOUT_MESSAGE: &str = "Your code took too long to execute.";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong while running your code.";

/// A single code-execution request, already validated and clamped by the caller.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub width: u32,
    pub height: u32,
    pub options: RunOptions,
}

impl ExecutionRequest {
    pub const fn environment(&self) -> Environment {
        self.options.environment()
    }
}

/// Environment-specific options; the variant selects the run environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOptions {
    ProcessingJs(PjsOptions),
    Webpage(WebpageOptions),
    Sql,
}

impl RunOptions {
    /// Default options for `environment`.
    pub fn defaults(environment: Environment) -> Self {
        match environment {
            Environment::ProcessingJs => Self::ProcessingJs(PjsOptions::default()),
            Environment::Webpage => Self::Webpage(WebpageOptions::default()),
            Environment::Sql => Self::Sql,
        }
    }

    pub const fn environment(&self) -> Environment {
        match self {
            Self::ProcessingJs(_) => Environment::ProcessingJs,
            Self::Webpage(_) => Environment::Webpage,
            Self::Sql => Environment::Sql,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PjsOptions {
    /// Wait after completion before capturing.
    pub delay: Duration,
    /// Capture the canvas at all.
    pub canvas: bool,
    /// Leave the platform's infinite-loop guard in place.
    pub loop_protector: bool,
    /// Capture a timed sequence instead of a single frame.
    pub animated: bool,
}

impl Default for PjsOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            canvas: true,
            loop_protector: true,
            animated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebpageOptions {
    /// Wrap the code in a minimal HTML document before injecting it.
    pub boilerplate: bool,
}

impl Default for WebpageOptions {
    fn default() -> Self {
        Self { boilerplate: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Gif,
}

impl ImageFormat {
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }
}

/// Encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// What a run-type adapter extracted after completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub image: Option<Image>,
    pub logs: Option<Vec<String>>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub environment: Environment,
    /// True iff the environment reported no errors.
    pub success: bool,
    pub error: Option<String>,
    /// Only present on success.
    pub image: Option<Image>,
    pub logs: Option<Vec<String>>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Build a result from the errors reported at completion and the capture.
    pub fn completed(
        environment: Environment,
        errors: &[LiveEditorError],
        capture: Capture,
        elapsed: Duration,
    ) -> Self {
        let success = errors.is_empty();
        Self {
            environment,
            success,
            error: classify_errors(errors),
            image: capture.image.filter(|_| success),
            logs: capture.logs,
            elapsed,
        }
    }

    pub fn failed(environment: Environment, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            environment,
            success: false,
            error: Some(error.into()),
            image: None,
            logs: None,
            elapsed,
        }
    }
}

/// User-facing message for the first reported error, if any.
pub fn classify_errors(errors: &[LiveEditorError]) -> Option<String> {
    let first = errors.first()?;
    if first.infinite_loop_node_type.is_some() {
        return Some(INFINITE_LOOP_MESSAGE.to_string());
    }
    Some(first.text.as_deref().map_or_else(
        || UNKNOWN_ERROR_MESSAGE.to_string(),
        |text| html_escape::decode_html_entities(text).into_owned(),
    ))
}

/// Pipeline failures. Each is terminal for its request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no code provided")]
    EmptyCode,

    #[error("failed to start browser: {0:#}")]
    Acquisition(anyhow::Error),

    #[error("could not find editor")]
    EditorNotFound,

    #[error("could not find output frame")]
    OutputFrameNotFound,

    #[error("could not resolve output frame")]
    FrameUnresolved,

    #[error("could not find output canvas")]
    CanvasNotFound,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion listener closed before the code finished")]
    CompletionClosed,

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl PipelineError {
    /// Message shown to the person who submitted the code.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyCode => NO_CODE_MESSAGE.into(),
            Self::EditorNotFound => "Could not find editor".into(),
            Self::OutputFrameNotFound => "Could not find output frame".into(),
            Self::FrameUnresolved => "Could not resolve output frame".into(),
            Self::CanvasNotFound => "Could not find output canvas".into(),
            Self::Timeout(_) => TIMEOUT_MESSAGE.into(),
            Self::Acquisition(_) | Self::CompletionClosed | Self::Unexpected(_) => {
                GENERIC_FAILURE_MESSAGE.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_with_text(text: &str) -> LiveEditorError {
        LiveEditorError {
            text: Some(text.into()),
            ..LiveEditorError::default()
        }
    }

    #[test]
    fn no_errors_means_success() {
        let result = ExecutionResult::completed(
            Environment::ProcessingJs,
            &[],
            Capture {
                image: Some(Image {
                    format: ImageFormat::Png,
                    bytes: vec![1, 2, 3],
                }),
                logs: Some(vec!["hello".into()]),
            },
            Duration::from_millis(10),
        );
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.image.is_some());
        assert_eq!(result.logs, Some(vec!["hello".to_string()]));
    }

    #[test]
    fn errors_drop_image_but_keep_logs() {
        let result = ExecutionResult::completed(
            Environment::ProcessingJs,
            &[error_with_text("oops")],
            Capture {
                image: Some(Image {
                    format: ImageFormat::Png,
                    bytes: vec![1],
                }),
                logs: Some(vec!["before the error".into()]),
            },
            Duration::ZERO,
        );
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("oops"));
        assert!(result.image.is_none());
        assert!(result.logs.is_some());
    }

    #[test]
    fn infinite_loop_takes_precedence_over_text() {
        let error = LiveEditorError {
            text: Some("A while loop is taking too long".into()),
            infinite_loop_node_type: Some("WhileStatement".into()),
            ..LiveEditorError::default()
        };
        assert_eq!(
            classify_errors(&[error]).as_deref(),
            Some(INFINITE_LOOP_MESSAGE)
        );
    }

    #[test]
    fn error_text_is_unescaped() {
        let errors = [
            error_with_text("near &quot;SELEC&quot;: syntax error &amp; &lt;more&gt; &#39;x&#39;"),
            error_with_text("second"),
        ];
        assert_eq!(
            classify_errors(&errors).as_deref(),
            Some(r#"near "SELEC": syntax error & <more> 'x'"#)
        );
    }

    #[test]
    fn nonempty_errors_always_have_a_message() {
        assert_eq!(
            classify_errors(&[LiveEditorError::default()]).as_deref(),
            Some(UNKNOWN_ERROR_MESSAGE)
        );
        assert!(classify_errors(&[]).is_none());
    }

    #[test]
    fn options_select_environment() {
        assert_eq!(
            RunOptions::ProcessingJs(PjsOptions::default()).environment(),
            Environment::ProcessingJs
        );
        assert_eq!(
            RunOptions::Webpage(WebpageOptions::default()).environment(),
            Environment::Webpage
        );
        assert_eq!(RunOptions::Sql.environment(), Environment::Sql);
    }

    #[test]
    fn user_messages() {
        assert_eq!(
            PipelineError::Timeout(Duration::from_secs(1)).user_message(),
            TIMEOUT_MESSAGE
        );
        assert_eq!(
            PipelineError::FrameUnresolved.user_message(),
            "Could not resolve output frame"
        );
        assert_eq!(
            PipelineError::Unexpected(anyhow::anyhow!("boom")).user_message(),
            GENERIC_FAILURE_MESSAGE
        );
    }
}
