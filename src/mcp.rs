//! MCP tool surface.
//!
//! Exposes one tool, `chat`, over the stdio transport. The tool feeds the
//! prompt straight to a conversational pipeline and returns the text
//! rendering of whatever the pipeline produced, without the normalization
//! the HTTP surface applies.
//!
//! # Client configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "chatbot": {
//!       "command": "chatbot",
//!       "args": ["--config", "/path/to/chatbot.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::inference::InferenceLoader;
use crate::pipeline::{PipelineHandle, PipelineInput, Task};

pub const TOOL_NAME: &str = "chat";

/// MCP handler owning the conversational pipeline.
///
/// Each session receives a clone; the pipeline handle is shared, so the
/// model is built once per process.
#[derive(Clone)]
pub struct ChatTool {
    pipeline: Arc<PipelineHandle>,
}

impl ChatTool {
    pub fn new(pipeline: Arc<PipelineHandle>) -> Self {
        Self { pipeline }
    }

    fn descriptor() -> Tool {
        let input_schema = match json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Message for the conversational model"
                }
            },
            "required": ["prompt"]
        }) {
            Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Borrowed(TOOL_NAME),
            title: None,
            description: Some(Cow::Borrowed(
                "Send a prompt to the conversational model and return its raw output",
            )),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Runs the `chat` tool on raw call arguments.
    pub async fn chat(&self, arguments: Option<JsonObject>) -> Result<CallToolResult, McpError> {
        let prompt = arguments
            .as_ref()
            .and_then(|args| args.get("prompt"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                McpError::new(
                    ErrorCode::INVALID_PARAMS,
                    "missing required string argument: prompt",
                    None,
                )
            })?;

        match self.pipeline.invoke_raw(&PipelineInput::converse(prompt)).await {
            Ok(raw) => Ok(CallToolResult::success(vec![Content::text(raw.to_string())])),
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "chat tool failed");
                Ok(CallToolResult::error(vec![Content::text(format!("Error: {}", e))]))
            }
        }
    }
}

impl ServerHandler for ChatTool {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "chatbot".to_string(),
                title: Some("Chatbot".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Use the chat tool to talk to the {} model.",
                self.pipeline.model()
            )),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(vec![
            Self::descriptor(),
        ])))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        (name == TOOL_NAME).then(Self::descriptor)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if request.name != TOOL_NAME {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }
        self.chat(request.arguments).await
    }
}

/// Serves the `chat` tool over stdin/stdout until the client disconnects.
///
/// The conversational pipeline is built before the transport starts.
pub async fn run_stdio(config: &Config) -> anyhow::Result<()> {
    let loader = InferenceLoader::new(&config.pipeline)?;
    let pipeline = Arc::new(PipelineHandle::new(
        Task::Conversational,
        config.tool_model(),
        Arc::new(loader),
    ));
    let _ = pipeline.warm_up().await;

    info!(model = %pipeline.model(), "starting MCP server on stdio");
    let service = ChatTool::new(pipeline)
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("failed to start MCP server: {e}"))?;

    service.waiting().await?;
    info!("MCP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineLoader};
    use async_trait::async_trait;

    struct EchoPipeline;

    #[async_trait]
    impl Pipeline for EchoPipeline {
        fn task(&self) -> Task {
            Task::Conversational
        }
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn run(&self, input: &PipelineInput) -> anyhow::Result<Value> {
            let PipelineInput::Converse { prompt } = input else {
                anyhow::bail!("expected a conversational input");
            };
            Ok(json!([{ "generated_text": format!("you said: {}", prompt) }]))
        }
    }

    struct EchoLoader;

    #[async_trait]
    impl PipelineLoader for EchoLoader {
        async fn load(&self, _task: Task, _model: &str) -> anyhow::Result<Arc<dyn Pipeline>> {
            Ok(Arc::new(EchoPipeline))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl PipelineLoader for FailingLoader {
        async fn load(&self, _task: Task, model: &str) -> anyhow::Result<Arc<dyn Pipeline>> {
            anyhow::bail!("model '{}' not found", model)
        }
    }

    fn tool(loader: Arc<dyn PipelineLoader>) -> ChatTool {
        ChatTool::new(Arc::new(PipelineHandle::new(
            Task::Conversational,
            "echo",
            loader,
        )))
    }

    fn args(value: Value) -> Option<JsonObject> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn first_text(result: &CallToolResult) -> String {
        result.content[0]
            .raw
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_chat_returns_raw_output_text() {
        let tool = tool(Arc::new(EchoLoader));
        let result = tool.chat(args(json!({ "prompt": "hi" }))).await.unwrap();

        assert_ne!(result.is_error, Some(true));
        let text = first_text(&result);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!([{ "generated_text": "you said: hi" }]));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_invalid_params() {
        let tool = tool(Arc::new(EchoLoader));
        let err = tool.chat(args(json!({ "text": "hi" }))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = tool.chat(None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_tool_error() {
        let tool = tool(Arc::new(FailingLoader));
        let result = tool.chat(args(json!({ "prompt": "hi" }))).await.unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(first_text(&result).contains("not found"));
    }

    #[test]
    fn test_descriptor_requires_prompt() {
        let tool = ChatTool::descriptor();
        assert_eq!(tool.name, TOOL_NAME);
        assert_eq!(tool.input_schema["required"], json!(["prompt"]));
    }
}
