//! Contract with the external live-editor platform.
//!
//! Everything here is a compatibility surface owned by the platform: page
//! URLs, DOM landmarks, the in-page scripts we evaluate, and the shape of the
//! completion message the output frame posts to its parent once it has run
//! the injected code. If any of it changes upstream, the pipeline fails closed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Code editor container on the top-level page.
pub const EDITOR_SELECTOR: &str = ".ace_editor";

/// Iframe hosting the nested execution context.
pub const OUTPUT_FRAME_SELECTOR: &str = "#output-frame";

/// Processing.js canvas inside the output frame.
pub const OUTPUT_CANVAS_SELECTOR: &str = "#output-canvas";

/// Nodes the Processing.js output frame renders `println` output into.
pub const CONSOLE_LINES_SELECTOR: &str = "body > div:nth-child(1) > div:nth-child(2) > div > div";

/// Name of the page binding the completion listener reports through.
pub const COMPLETION_BINDING: &str = "__kaRunnerCompletion";

/// One of the three live-editor run environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(rename = "pjs")]
    ProcessingJs,
    Webpage,
    Sql,
}

impl Environment {
    /// Path segment of the "new program" page for this environment.
    pub const fn slug(self) -> &'static str {
        match self {
            Self::ProcessingJs => "pjs",
            Self::Webpage => "webpage",
            Self::Sql => "sql",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::ProcessingJs => "Processing.js",
            Self::Webpage => "Webpage",
            Self::Sql => "SQL",
        }
    }

    /// Run-environment page URL. The editor UI is irrelevant headless, so the
    /// editor-hidden view is always requested.
    pub fn page_url(self, base_url: &str, width: u32, height: u32) -> String {
        format!(
            "{}/{}?editor=no&width={width}&height={height}",
            base_url.trim_end_matches('/'),
            self.slug()
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pjs" | "processingjs" | "processing.js" => Ok(Self::ProcessingJs),
            "webpage" | "html" => Ok(Self::Webpage),
            "sql" => Ok(Self::Sql),
            other => Err(format!("unknown run environment: '{other}'")),
        }
    }
}

/// Message the output frame posts to its parent after evaluating code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub results: CompletionResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResults {
    /// The source the frame just ran.
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub errors: Vec<LiveEditorError>,
}

/// Structured error reported by the live editor.
///
/// Only the fields the result is built from are read; everything else the
/// editor attaches (position, type, source) is ignored whatever its shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEditorError {
    /// HTML-escaped message text.
    #[serde(default)]
    pub text: Option<String>,
    /// Set when the loop protector aborted the program.
    #[serde(default)]
    pub infinite_loop_node_type: Option<String>,
}

/// In-page scripts. Every user-controlled string is embedded as a JSON
/// string literal, never spliced raw.
pub mod script {
    fn literal(value: &str) -> String {
        serde_json::Value::from(value).to_string()
    }

    pub fn selector_exists(selector: &str) -> String {
        format!("document.querySelector({}) !== null", literal(selector))
    }

    /// Forward every cross-frame message to the completion binding. Matching
    /// against the injected code happens on the receiving side.
    pub fn install_completion_listener(binding: &str) -> String {
        format!(
            r"(() => {{
  const notify = window[{binding}];
  window.addEventListener('message', ({{ data }}) => {{
    try {{
      notify(typeof data === 'string' ? data : JSON.stringify(data));
    }} catch (_) {{}}
  }});
  return true;
}})()",
            binding = literal(binding)
        )
    }

    pub fn set_editor_value(editor_selector: &str, code: &str) -> String {
        format!(
            "(() => {{ document.querySelector({}).env.editor.setValue({}); return true; }})()",
            literal(editor_selector),
            literal(code)
        )
    }

    /// Neutralise the platform's infinite-loop guard inside the output frame.
    pub const DISABLE_LOOP_PROTECTOR: &str =
        "(() => { window.LoopProtector.prototype.leave = null; return true; })()";

    /// `data:` URI of a canvas, or `null` when the element is missing.
    pub fn canvas_data_url(selector: &str) -> String {
        format!(
            "(() => {{ const canvas = document.querySelector({}); return canvas ? canvas.toDataURL() : null; }})()",
            literal(selector)
        )
    }

    pub fn text_contents(selector: &str) -> String {
        format!(
            "Array.from(document.querySelectorAll({}), (el) => el.textContent ?? '')",
            literal(selector)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_requests_hidden_editor() {
        let url = Environment::ProcessingJs.page_url(
            "https://www.khanacademy.org/computer-programming/new/",
            400,
            300,
        );
        assert_eq!(
            url,
            "https://www.khanacademy.org/computer-programming/new/pjs?editor=no&width=400&height=300"
        );
        assert!(Environment::Sql.page_url("http://x", 1, 1).contains("/sql?"));
    }

    #[test]
    fn environment_from_str() {
        assert_eq!("pjs".parse::<Environment>(), Ok(Environment::ProcessingJs));
        assert_eq!("HTML".parse::<Environment>(), Ok(Environment::Webpage));
        assert_eq!("sql".parse::<Environment>(), Ok(Environment::Sql));
        assert!("python".parse::<Environment>().is_err());
    }

    #[test]
    fn deserialize_completion_message() {
        let json = r#"{
            "results": {
                "code": "while(true){}",
                "errors": [{
                    "type": "error",
                    "row": 0,
                    "line": 1,
                    "text": "A &lt;b&gt; loop",
                    "infiniteLoopNodeType": "WhileStatement"
                }]
            }
        }"#;

        let message: CompletionMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.results.code.as_deref(), Some("while(true){}"));
        let error = &message.results.errors[0];
        assert_eq!(error.text.as_deref(), Some("A &lt;b&gt; loop"));
        assert_eq!(error.infinite_loop_node_type.as_deref(), Some("WhileStatement"));
    }

    #[test]
    fn missing_errors_default_to_empty() {
        let message: CompletionMessage =
            serde_json::from_str(r#"{"results": {"code": "rect(0, 0, 10, 10);"}}"#).unwrap();
        assert!(message.results.errors.is_empty());
    }

    #[test]
    fn scripts_quote_user_input() {
        let code = "println(\"hi\");\n</script>";
        let js = script::set_editor_value(EDITOR_SELECTOR, code);
        assert!(js.contains(r#"setValue("println(\"hi\");\n</script>")"#));
        assert!(js.contains(r#"document.querySelector(".ace_editor")"#));

        let js = script::install_completion_listener(COMPLETION_BINDING);
        assert!(js.contains(r#"window["__kaRunnerCompletion"]"#));
    }
}
