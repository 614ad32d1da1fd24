//! Webpage (HTML) adapter.

use async_trait::async_trait;

use super::{screenshot_output_frame, ExtractionStrategy, FrameScope};
use crate::request::{Capture, PipelineError, WebpageOptions};

#[derive(Debug, Clone)]
pub struct WebpageStrategy {
    options: WebpageOptions,
}

impl WebpageStrategy {
    pub const fn new(options: WebpageOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ExtractionStrategy for WebpageStrategy {
    fn prepare_code(&self, code: &str) -> String {
        if self.options.boilerplate {
            wrap_boilerplate(code)
        } else {
            code.to_owned()
        }
    }

    async fn teardown(&self, scope: &FrameScope<'_>) -> Result<Capture, PipelineError> {
        screenshot_output_frame(scope).await
    }
}

/// Wrap an HTML fragment in a minimal document.
pub fn wrap_boilerplate(html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8">
        <title>New webpage</title>
    </head>
    <body>
        {html}
    </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boilerplate_wraps_exactly_once() {
        let strategy = WebpageStrategy::new(WebpageOptions { boilerplate: true });
        let code = "<h1>Hello</h1>";
        let prepared = strategy.prepare_code(code);

        assert!(prepared.starts_with("<!DOCTYPE html>"));
        assert_eq!(prepared.matches("<!DOCTYPE html>").count(), 1);
        assert_eq!(prepared.matches(code).count(), 1);
        assert!(prepared.contains("<title>New webpage</title>"));
    }

    #[test]
    fn without_boilerplate_code_is_untouched() {
        let strategy = WebpageStrategy::new(WebpageOptions { boilerplate: false });
        let code = "  <p>raw</p>\n\t";
        assert_eq!(strategy.prepare_code(code), code);
    }
}
