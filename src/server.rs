//! MCP Server implementation with Google Analytics tools.

use std::borrow::Cow;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData as McpError, Implementation,
        ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars::{self, JsonSchema},
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::datasource::{resource_result, Analytics};

/// Google Analytics MCP Server.
#[derive(Clone)]
pub struct AnalyticsServer {
    analytics: Analytics,
    shutdown: CancellationToken,
    tool_router: ToolRouter<Self>,
}

impl AnalyticsServer {
    /// `shutdown` cancels every in-flight call when the server stops.
    pub fn new(analytics: Analytics, shutdown: CancellationToken) -> Self {
        Self {
            analytics,
            shutdown,
            tool_router: Self::tool_router(),
        }
    }

    fn call_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert any error to McpError
fn to_mcp_error<E: std::fmt::Display>(e: E) -> McpError {
    McpError {
        code: ErrorCode::INTERNAL_ERROR,
        message: Cow::from(e.to_string()),
        data: None,
    }
}

fn json_result(tool: &str, value: &Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(to_mcp_error)?;
    tracing::debug!(tool, bytes = text.len(), "tool result");
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn log_tool_call(tool: &str, params: &Value) {
    tracing::debug!(tool, params = %params, "tool call");
}

// ============================================================================
// Tool Parameter Structs
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Query object: accountId, webPropertyId, profileId, refId, metrics, timeDimension,
    /// dimensions, startDate/endDate or timeRange {from, to}, timezone, pageSize,
    /// pageToken, useNextPage, filtersExpression, mode ("table", "time series", "realtime")
    pub query: Value,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryBatchParams {
    /// Query objects; each result is keyed by its refId, or `#<position>` without one
    pub queries: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AccountParams {
    /// Account ID (e.g., "12345" or "accounts/12345")
    pub account_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WebPropertyParams {
    /// Account ID
    pub account_id: String,
    /// Web property ID (e.g., "UA-12345-1" or "properties/67890")
    pub web_property_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProfileParams {
    /// Account ID
    pub account_id: String,
    /// Web property ID
    pub web_property_id: String,
    /// Profile (view) ID; unused for GA4 properties
    #[serde(default)]
    pub profile_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CatalogParams {
    /// Web property ID; empty selects the common GA4 catalog
    #[serde(default)]
    pub web_property_id: String,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl AnalyticsServer {
    // ========================================================================
    // Query Tools
    // ========================================================================

    #[tool(description = "Run a Google Analytics report. Time-series queries return one frame per dimension group with zero-filled boundary points; table and realtime queries return a single frame.")]
    async fn query(&self, Parameters(params): Parameters<QueryParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("query", &params.query);

        let frames = self
            .analytics
            .query(params.query, &self.call_token())
            .await
            .map_err(to_mcp_error)?;

        let json = json!({ "frames": frames });
        json_result("query", &json)
    }

    #[tool(description = "Run several reports at once. Every query gets its own result slot (frames or error) keyed by refId; one failure does not affect the others.")]
    async fn query_batch(&self, Parameters(params): Parameters<QueryBatchParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("query_batch", &json!({ "queries": params.queries.len() }));

        let responses = self
            .analytics
            .query_batch(params.queries, &self.call_token())
            .await;

        let json = serde_json::to_value(&responses).map_err(to_mcp_error)?;
        json_result("query_batch", &json)
    }

    #[tool(description = "Check credentials and connectivity by running a one-day report on the first reachable property.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("health_check", &json!({}));

        let status = self.analytics.health_check(&self.call_token()).await;

        let json = serde_json::to_value(&status).map_err(to_mcp_error)?;
        json_result("health_check", &json)
    }

    // ========================================================================
    // Hierarchy Tools
    // ========================================================================

    #[tool(description = "List accounts as a map of account ID to display name.")]
    async fn list_accounts(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("list_accounts", &json!({}));

        let result = self.analytics.accounts(&self.call_token()).await;
        json_result("list_accounts", &resource_result("accounts", result))
    }

    #[tool(description = "List the web properties (GA4: properties) of an account as a map of ID to display name.")]
    async fn list_web_properties(&self, Parameters(params): Parameters<AccountParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("list_web_properties", &json!(params));

        let result = self
            .analytics
            .web_properties(&params.account_id, &self.call_token())
            .await;
        json_result("list_web_properties", &resource_result("webProperties", result))
    }

    #[tool(description = "List the profiles (GA4: data streams) of a web property as a map of ID to display name.")]
    async fn list_profiles(&self, Parameters(params): Parameters<WebPropertyParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("list_profiles", &json!(params));

        let result = self
            .analytics
            .profiles(&params.account_id, &params.web_property_id, &self.call_token())
            .await;
        json_result("list_profiles", &resource_result("profiles", result))
    }

    #[tool(description = "List every profile of every property of every account. Fails as a whole if any property cannot be listed.")]
    async fn list_all_profiles(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("list_all_profiles", &json!({}));

        let result = self.analytics.all_profiles(&self.call_token()).await;
        json_result("list_all_profiles", &resource_result("profiles", result))
    }

    #[tool(description = "Get the reporting timezone of a profile (UA) or property (GA4).")]
    async fn get_timezone(&self, Parameters(params): Parameters<ProfileParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("get_timezone", &json!(params));

        let result = self
            .analytics
            .timezone(
                &params.account_id,
                &params.web_property_id,
                &params.profile_id,
                &self.call_token(),
            )
            .await;
        json_result("get_timezone", &resource_result("timezone", result))
    }

    #[tool(description = "Get the service level of a GA4 property (standard or 360). Universal Analytics properties report an empty string.")]
    async fn get_service_level(&self, Parameters(params): Parameters<WebPropertyParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("get_service_level", &json!(params));

        let result = self
            .analytics
            .service_level(&params.account_id, &params.web_property_id, &self.call_token())
            .await;
        json_result("get_service_level", &resource_result("serviceLevel", result))
    }

    #[tool(description = "List account summaries with their properties. Accounts without properties are omitted.")]
    async fn list_account_summaries(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("list_account_summaries", &json!({}));

        let result = self.analytics.account_summaries(&self.call_token()).await;
        json_result("list_account_summaries", &resource_result("accountSummaries", result))
    }

    // ========================================================================
    // Catalog Tools
    // ========================================================================

    #[tool(description = "List the selectable dimensions of a property. Deprecated and replaced entries are omitted.")]
    async fn list_dimensions(&self, Parameters(params): Parameters<CatalogParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("list_dimensions", &json!(params));

        let result = self
            .analytics
            .dimensions(&params.web_property_id, &self.call_token())
            .await;
        json_result("list_dimensions", &resource_result("dimensions", result))
    }

    #[tool(description = "List the selectable metrics of a property. Deprecated and replaced entries are omitted.")]
    async fn list_metrics(&self, Parameters(params): Parameters<CatalogParams>) -> Result<CallToolResult, McpError> {
        log_tool_call("list_metrics", &json!(params));

        let result = self
            .analytics
            .metrics(&params.web_property_id, &self.call_token())
            .await;
        json_result("list_metrics", &resource_result("metrics", result))
    }

    #[tool(description = "List the dimensions available to realtime queries.")]
    async fn list_realtime_dimensions(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("list_realtime_dimensions", &json!({}));

        let dimensions = self.analytics.realtime_dimensions();
        let json = json!({ "dimensions": dimensions });
        json_result("list_realtime_dimensions", &json)
    }

    #[tool(description = "List the metrics available to realtime queries.")]
    async fn list_realtime_metrics(&self) -> Result<CallToolResult, McpError> {
        log_tool_call("list_realtime_metrics", &json!({}));

        let metrics = self.analytics.realtime_metrics();
        let json = json!({ "metrics": metrics });
        json_result("list_realtime_metrics", &json)
    }
}

#[tool_handler]
impl ServerHandler for AnalyticsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "Google Analytics MCP Server ({:?}) - Browse accounts, properties and profiles, \
                list dimension and metric catalogs, and run table, time-series and realtime reports.",
                self.analytics.version()
            )),
        }
    }
}
