//! The MCP server surface: tool definitions, response formatting, and the
//! `data_analysis` prompt. Each tool call builds a fresh client from the
//! current credentials so a `setup_config` call takes effect immediately.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, GetPromptRequestParam, GetPromptResult, Implementation,
        ListPromptsResult, PaginatedRequestParam, Prompt, PromptArgument, PromptMessage,
        PromptMessageRole, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{error, info};

use pql_client::{
    InteractionOutcome, PollConfig, QueryServiceClient, ThreadCoordinator, ThreadStart,
    ThreadStatus,
};
use pql_core::{mask_secret, Config, ConfigStore, Error};

const DATA_ANALYSIS_PROMPT: &str = "data_analysis";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartThreadArgs {
    /// The initial message to start the thread with
    pub message: String,
    /// Optional system instructions for the query engine
    pub system_instructions: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContinueThreadArgs {
    /// The ID of the thread to continue
    pub thread_id: String,
    /// The new message to add to the thread
    pub message: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadIdArgs {
    /// The ID of the thread
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetupConfigArgs {
    /// API key for the query service
    pub api_key: String,
    /// Base URL of the query service
    pub service_url: String,
    /// Optional data-plane auth token forwarded with each request
    pub auth_token: Option<String>,
}

pub struct PromptQlServer {
    store: ConfigStore,
    config: Arc<RwLock<Config>>,
    poll: PollConfig,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PromptQlServer {
    pub fn new(store: ConfigStore, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(RwLock::new(config)),
            poll: PollConfig::default(),
            tool_router: Self::tool_router(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    async fn coordinator(&self) -> Result<ThreadCoordinator, Error> {
        let config = self.config.read().await.clone();
        let client = QueryServiceClient::from_config(&config)?;
        Ok(ThreadCoordinator::new(Arc::new(client)).with_poll_config(self.poll.clone()))
    }

    #[tool(
        description = "Start a new query thread with a message and wait for the answer. Returns the thread ID, interaction ID, and the response content."
    )]
    async fn start_thread(
        &self,
        Parameters(args): Parameters<StartThreadArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(message = %args.message, "Tool call: start_thread");
        let result = match self.coordinator().await {
            Ok(coordinator) => {
                coordinator
                    .start_thread(&args.message, args.system_instructions.as_deref(), true)
                    .await
            }
            Err(err) => Err(err),
        };

        Ok(match result {
            Ok(start) => CallToolResult::success(vec![Content::text(format_start(&start))]),
            Err(err) => tool_error(err),
        })
    }

    #[tool(
        description = "Start a new query thread without waiting for completion. Returns the thread ID and interaction ID; use get_thread_status to check progress."
    )]
    async fn start_thread_without_polling(
        &self,
        Parameters(args): Parameters<StartThreadArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(message = %args.message, "Tool call: start_thread_without_polling");
        let result = match self.coordinator().await {
            Ok(coordinator) => {
                coordinator
                    .start_thread(&args.message, args.system_instructions.as_deref(), false)
                    .await
            }
            Err(err) => Err(err),
        };

        Ok(match result {
            Ok(start) => CallToolResult::success(vec![Content::text(format_start(&start))]),
            Err(err) => tool_error(err),
        })
    }

    #[tool(
        description = "Continue an existing query thread with a new message and wait for the answer."
    )]
    async fn continue_thread(
        &self,
        Parameters(args): Parameters<ContinueThreadArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(thread_id = %args.thread_id, "Tool call: continue_thread");
        let result = match self.coordinator().await {
            Ok(coordinator) => {
                coordinator
                    .continue_thread(&args.thread_id, &args.message, true)
                    .await
            }
            Err(err) => Err(err),
        };

        Ok(match result {
            Ok(start) => CallToolResult::success(vec![Content::text(format_continue(&start))]),
            Err(err) => tool_error(err),
        })
    }

    #[tool(
        description = "Get the current status of a query thread, including the response content once complete."
    )]
    async fn get_thread_status(
        &self,
        Parameters(args): Parameters<ThreadIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(thread_id = %args.thread_id, "Tool call: get_thread_status");
        let result = match self.coordinator().await {
            Ok(coordinator) => coordinator.get_status(&args.thread_id).await,
            Err(err) => Err(err),
        };

        Ok(match result {
            Ok(status) => CallToolResult::success(vec![Content::text(format_status(&status))]),
            Err(err) => tool_error(err),
        })
    }

    #[tool(description = "Cancel the processing of the latest interaction in a query thread.")]
    async fn cancel_thread(
        &self,
        Parameters(args): Parameters<ThreadIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!(thread_id = %args.thread_id, "Tool call: cancel_thread");
        let result = match self.coordinator().await {
            Ok(coordinator) => coordinator.cancel(&args.thread_id).await,
            Err(err) => Err(err),
        };

        Ok(match result {
            Ok(outcome) => CallToolResult::success(vec![Content::text(outcome.as_str())]),
            Err(err) => tool_error(err),
        })
    }

    #[tool(
        description = "Configure the server with the query service API key, service URL, and optional auth token."
    )]
    async fn setup_config(
        &self,
        Parameters(args): Parameters<SetupConfigArgs>,
    ) -> Result<CallToolResult, McpError> {
        info!("Tool call: setup_config");
        let config = Config::new(args.api_key, args.service_url, args.auth_token);

        if let Err(err) = self.store.save(&config) {
            error!(error = %err, "Failed to save configuration");
            return Ok(tool_error(err));
        }
        *self.config.write().await = config;

        info!(path = %self.store.path().display(), "Configuration saved");
        Ok(CallToolResult::success(vec![Content::text(
            "Configuration saved successfully.",
        )]))
    }

    #[tool(description = "Check whether the server is configured with query service credentials.")]
    async fn check_config(&self) -> Result<CallToolResult, McpError> {
        info!("Tool call: check_config");
        let config = self.config.read().await;
        Ok(CallToolResult::success(vec![Content::text(
            describe_config(&config),
        )]))
    }
}

fn tool_error(err: Error) -> CallToolResult {
    error!(error = %err, "Tool call failed");
    CallToolResult::error(vec![Content::text(format!("Error: {}", err))])
}

fn outcome_text(outcome: &InteractionOutcome) -> &str {
    match outcome {
        InteractionOutcome::Created => {
            "Thread started successfully. Use get_thread_status to check progress or continue_thread to add more messages."
        }
        InteractionOutcome::Complete { content } => content,
        InteractionOutcome::Cancelled => "The interaction was cancelled.",
        InteractionOutcome::TimedOut => {
            "The thread is still processing. Use get_thread_status to check progress."
        }
        InteractionOutcome::Failed { message } => message,
    }
}

fn format_start(start: &ThreadStart) -> String {
    let mut text = format!("Thread ID: {}", start.thread_id);
    if let Some(id) = &start.interaction_id {
        text.push_str(&format!("\nInteraction ID: {}", id));
    }
    text.push_str("\n\n");
    if let InteractionOutcome::Failed { .. } = &start.outcome {
        text.push_str("Error: ");
    }
    text.push_str(outcome_text(&start.outcome));
    text
}

fn format_continue(start: &ThreadStart) -> String {
    let mut text = String::new();
    if let Some(id) = &start.interaction_id {
        text.push_str(&format!("Interaction ID: {}\n\n", id));
    }
    if let InteractionOutcome::Failed { .. } = &start.outcome {
        text.push_str("Error: ");
    }
    text.push_str(outcome_text(&start.outcome));
    text
}

fn format_status(status: &ThreadStatus) -> String {
    let mut text = format!(
        "Thread {}:\nStatus: {}\nTotal interactions: {}\n",
        status.thread_id,
        status.status.as_str(),
        status.interaction_count
    );

    match status.status {
        pql_client::InteractionStatus::Processing => {
            text.push_str("The thread is currently processing. Check again in a few moments.");
        }
        pql_client::InteractionStatus::Complete => {
            text.push_str("The thread has completed processing.");
            if let Some(content) = &status.content {
                text.push_str("\n\n");
                text.push_str(content);
            }
        }
        _ => {}
    }
    text
}

fn describe_config(config: &Config) -> String {
    if config.is_valid() {
        let key = config.api_key.as_deref().unwrap_or_default();
        let url = config.service_url.as_deref().unwrap_or_default();
        let mut text = format!(
            "The query service is configured with:\nAPI Key: {}\nService URL: {}",
            mask_secret(key, 5, 5),
            url
        );
        if let Some(token) = config.auth_token.as_deref() {
            text.push_str(&format!("\nAuth Token: {}", mask_secret(token, 8, 4)));
        }
        text
    } else {
        format!(
            "The query service is not fully configured. Missing: {}",
            config.missing_fields().join(", ")
        )
    }
}

fn data_analysis_prompt(topic: &str) -> String {
    format!(
        "Please analyze my data related to {}.\n\
         Include the following in your analysis:\n\
         1. Key trends over time\n\
         2. Important correlations\n\
         3. Unusual patterns or anomalies\n\
         4. Actionable insights",
        topic
    )
}

#[tool_handler]
impl ServerHandler for PromptQlServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(
            ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
        )
        .with_protocol_version(ProtocolVersion::default())
        .with_server_info(Implementation::from_build_env())
        .with_instructions(
            "Ask questions about your data in natural language. Use start_thread for a new \
             question, continue_thread for follow-ups on the same thread, and setup_config \
             to provide query service credentials.",
        )
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            meta: None,
            next_cursor: None,
            prompts: vec![Prompt::new(
                DATA_ANALYSIS_PROMPT,
                Some("Create a prompt for data analysis on a specific topic"),
                Some(vec![PromptArgument::new("topic")
                    .with_description("The subject area to analyze")
                    .with_required(true)]),
            )],
        })
    }

    async fn get_prompt(
        &self,
        GetPromptRequestParam {
            name, arguments, ..
        }: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        if name != DATA_ANALYSIS_PROMPT {
            return Err(McpError::invalid_params(
                format!("prompt not found: {}", name),
                None,
            ));
        }

        let topic = arguments
            .as_ref()
            .and_then(|args| args.get("topic"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                McpError::invalid_params("missing required argument: topic", None)
            })?;

        Ok(GetPromptResult::new(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            data_analysis_prompt(topic),
        )])
        .with_description(format!("Data analysis prompt for {}", topic)))
    }
}
