//! MCP server implementation using rmcp.
//!
//! Exposes the three live-editor run environments as MCP tools.

use std::fmt::Write as _;
use std::sync::Arc;

use base64::Engine as _;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::backend::BrowserBackend;
use crate::config::{Config, LogLimits, RunConfig};
use crate::logs::LogSection;
use crate::pipeline::Runner;
use crate::request::{ExecutionRequest, ExecutionResult, PjsOptions, RunOptions, WebpageOptions};
use crate::target::Environment;

/// MCP server for live-editor code execution.
#[derive(Clone)]
pub struct RunnerServer<B: Clone> {
    runner: Arc<Runner<B>>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the `run_pjs` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunPjsParams {
    #[schemars(description = "Processing.js source to run")]
    pub code: String,

    #[schemars(description = "Canvas width in pixels (1-1200, default 400)")]
    pub width: Option<u32>,

    #[schemars(description = "Canvas height in pixels (1-1200, default 400)")]
    pub height: Option<u32>,

    #[schemars(description = "Milliseconds to wait after the code ran before capturing (0-10000)")]
    pub delay: Option<u64>,

    #[schemars(description = "Keep the infinite-loop guard enabled (default true)")]
    pub loop_protector: Option<bool>,

    #[schemars(description = "Capture the canvas (default true)")]
    pub canvas: Option<bool>,

    #[schemars(description = "Capture an animated GIF instead of a still image (default false)")]
    pub animated: Option<bool>,
}

/// Parameters for the `run_webpage` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunWebpageParams {
    #[schemars(description = "HTML source to render")]
    pub code: String,

    #[schemars(description = "Viewport width in pixels (1-1200, default 400)")]
    pub width: Option<u32>,

    #[schemars(description = "Viewport height in pixels (1-1200, default 400)")]
    pub height: Option<u32>,

    #[schemars(description = "Wrap the code in a minimal HTML document (default true)")]
    pub boilerplate: Option<bool>,
}

/// Parameters for the `run_sql` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSqlParams {
    #[schemars(description = "SQL statements to run")]
    pub code: String,

    #[schemars(description = "Viewport width in pixels (1-1200, default 400)")]
    pub width: Option<u32>,

    #[schemars(description = "Viewport height in pixels (1-1200, default 400)")]
    pub height: Option<u32>,
}

impl RunPjsParams {
    /// Clamp every option into the configured bounds.
    pub fn into_request(self, run: &RunConfig) -> ExecutionRequest {
        let animated = self.animated.unwrap_or(false);
        let mut width = run.width(self.width);
        let mut height = run.height(self.height);
        if animated {
            (width, height) = run.animation_dimensions(width, height);
        }
        ExecutionRequest {
            code: self.code,
            width,
            height,
            options: RunOptions::ProcessingJs(PjsOptions {
                delay: run.delay(self.delay),
                canvas: self.canvas.unwrap_or(true),
                loop_protector: self.loop_protector.unwrap_or(true),
                animated,
            }),
        }
    }
}

impl RunWebpageParams {
    pub fn into_request(self, run: &RunConfig) -> ExecutionRequest {
        ExecutionRequest {
            code: self.code,
            width: run.width(self.width),
            height: run.height(self.height),
            options: RunOptions::Webpage(WebpageOptions {
                boilerplate: self.boilerplate.unwrap_or(true),
            }),
        }
    }
}

impl RunSqlParams {
    pub fn into_request(self, run: &RunConfig) -> ExecutionRequest {
        ExecutionRequest {
            code: self.code,
            width: run.width(self.width),
            height: run.height(self.height),
            options: RunOptions::Sql,
        }
    }
}

#[tool_router]
impl<B: BrowserBackend + Clone + 'static> RunnerServer<B> {
    /// Create a new runner server.
    pub fn new(config: Config, backend: B) -> Self {
        Self {
            runner: Arc::new(Runner::new(Arc::new(config), Arc::new(backend))),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Run Processing.js code and return a canvas image and console logs")]
    async fn run_pjs(
        &self,
        Parameters(params): Parameters<RunPjsParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.into_request(&self.runner.config().run);
        Ok(self.run(request).await)
    }

    #[tool(description = "Render an HTML webpage and return a screenshot")]
    async fn run_webpage(
        &self,
        Parameters(params): Parameters<RunWebpageParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.into_request(&self.runner.config().run);
        Ok(self.run(request).await)
    }

    #[tool(description = "Run SQL statements and return a screenshot of the results")]
    async fn run_sql(
        &self,
        Parameters(params): Parameters<RunSqlParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.into_request(&self.runner.config().run);
        Ok(self.run(request).await)
    }

    async fn run(&self, request: ExecutionRequest) -> CallToolResult {
        info!(
            environment = %request.environment(),
            code_len = request.code.len(),
            width = request.width,
            height = request.height,
            "Running code"
        );
        let result = self.runner.evaluate(request).await;
        tool_result(&result, self.runner.config().run.logs)
    }
}

#[tool_handler]
impl<B: BrowserBackend + Clone + 'static> ServerHandler for RunnerServer<B> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ka-runner".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run code in the Khan Academy live editor.\n\
                 \n\
                 - run_pjs: Processing.js programs (canvas image, console logs)\n\
                 - run_webpage: HTML pages (screenshot)\n\
                 - run_sql: SQL statements (screenshot of the result tables)"
                    .into(),
            ),
        }
    }
}

/// Text summary of a run: title, error, logs and elapsed time.
pub fn render_summary(result: &ExecutionResult, limits: LogLimits) -> String {
    let mut out = format!("**{} Output**\n", result.environment.title());

    if let Some(error) = &result.error {
        let _ = writeln!(out, "Error: {error}");
    }

    let logs = result.logs.as_deref().unwrap_or_default();
    if !logs.is_empty() {
        let _ = writeln!(out, "{}", LogSection::from_logs(logs, limits));
    } else if result.success
        && result.environment == Environment::ProcessingJs
        && result.image.is_none()
    {
        out.push_str("No logs!\n");
    }

    let _ = write!(out, "Took {:.3}s", result.elapsed.as_secs_f64());
    out
}

/// Convert a run into tool output. Failed runs are reported as tool errors.
pub fn tool_result(result: &ExecutionResult, limits: LogLimits) -> CallToolResult {
    let mut content = vec![Content::text(render_summary(result, limits))];
    if let Some(image) = &result.image {
        content.push(Content::image(
            base64::engine::general_purpose::STANDARD.encode(&image.bytes),
            image.format.mime_type(),
        ));
    }

    if result.success {
        CallToolResult::success(content)
    } else {
        CallToolResult::error(content)
    }
}

/// Serve the runner over stdio.
pub async fn serve_stdio<B: BrowserBackend + Clone + 'static>(
    config: Config,
    backend: B,
) -> anyhow::Result<()> {
    let server = RunnerServer::new(config, backend);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
