//! Remote market-data provider over MCP (streamable HTTP)
//!
//! JSON-RPC 2.0 over HTTP POST. Responses arrive either as a JSON body or as
//! an SSE stream of `data:` lines. The provider's own tool names are mapped
//! onto the five logical operations.

use crate::error::PipelineError;
use crate::models::{FinancialRatios, NewsItem};
use crate::tools::local::{compute_ratios, CompanySnapshot, StatementTable};
use crate::tools::resolver::ProviderConnector;
use crate::tools::{MarketDataTools, StatementKind, ToolSource};
use crate::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";

mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

const REMOTE_STOCK_INFO: &str = "get_stock_info";
const REMOTE_HISTORY: &str = "get_historical_stock_prices";
const REMOTE_STATEMENT: &str = "get_financial_statement";
const REMOTE_NEWS: &str = "get_yahoo_finance_news";

/// Provider tools the five logical operations depend on.
pub const REQUIRED_REMOTE_TOOLS: [&str; 4] =
    [REMOTE_STOCK_INFO, REMOTE_HISTORY, REMOTE_STATEMENT, REMOTE_NEWS];

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// An initialized MCP session.
pub struct McpSession {
    client: Client,
    url: String,
    session_id: Option<String>,
    next_id: AtomicU64,
    tools: Vec<String>,
}

impl McpSession {
    /// Run the handshake: `initialize`, `notifications/initialized`, `tools/list`.
    pub async fn connect(client: Client, url: impl Into<String>) -> Result<Self> {
        let mut session = Self {
            client,
            url: url.into(),
            session_id: None,
            next_id: AtomicU64::new(1),
            tools: Vec::new(),
        };

        let (session_id, init) = session
            .exchange(
                methods::INITIALIZE,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        session.session_id = session_id;

        let server = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let protocol = init
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server, protocol, "MCP server initialized");

        session.notify(methods::INITIALIZED).await?;

        let listed = session.request(methods::TOOLS_LIST, json!({})).await?;
        session.tools = listed
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        info!(tools = session.tools.len(), "MCP tools listed");
        Ok(session)
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn post(&self, payload: &JsonRpcRequest<'_>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(payload);
        if let Some(session_id) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        builder
    }

    /// Send a request and return the session header (if any) with the result.
    async fn exchange(&self, method: &str, params: Value) -> Result<(Option<String>, Value)> {
        let id = self.next_request_id();
        let payload = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: Some(params),
        };

        let response = self.post(&payload).send().await.map_err(|e| {
            PipelineError::ToolProviderUnavailable(format!("{} request failed: {}", method, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::ToolProviderUnavailable(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response.text().await.map_err(|e| {
            PipelineError::ToolProviderUnavailable(format!("{} body unreadable: {}", method, e))
        })?;

        let rpc = parse_rpc_body(&content_type, &body, id)?;
        if let Some(error) = rpc.error {
            return Err(PipelineError::ToolProviderUnavailable(format!(
                "{} failed: {} ({})",
                method, error.message, error.code
            )));
        }
        let result = rpc.result.ok_or_else(|| {
            PipelineError::ToolProviderUnavailable(format!("{} returned no result", method))
        })?;

        Ok((session_id, result))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (_, result) = self.exchange(method, params).await?;
        Ok(result)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let payload = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        };
        self.post(&payload).send().await.map_err(|e| {
            PipelineError::ToolProviderUnavailable(format!("{} notification failed: {}", method, e))
        })?;
        Ok(())
    }

    /// Call a provider tool and join its text content.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        debug!(tool = name, "Calling MCP tool");
        let result = self
            .request(
                methods::TOOLS_CALL,
                json!({ "name": name, "arguments": arguments }),
            )
            .await?;

        let text = tool_result_text(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(PipelineError::ToolError(format!("{}: {}", name, text)));
        }
        Ok(text)
    }
}

fn parse_rpc_body(content_type: &str, body: &str, id: u64) -> Result<JsonRpcResponse> {
    if content_type.starts_with("text/event-stream") {
        let mut fallback = None;
        for line in body.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let Ok(message) = serde_json::from_str::<JsonRpcResponse>(data.trim()) else {
                continue;
            };
            if message.id.as_ref().and_then(Value::as_u64) == Some(id) {
                return Ok(message);
            }
            if fallback.is_none() && (message.result.is_some() || message.error.is_some()) {
                fallback = Some(message);
            }
        }
        return fallback.ok_or_else(|| {
            PipelineError::ToolProviderUnavailable(
                "event stream carried no JSON-RPC response".to_string(),
            )
        });
    }

    serde_json::from_str(body).map_err(|e| {
        PipelineError::ToolProviderUnavailable(format!("malformed JSON-RPC response: {}", e))
    })
}

fn tool_result_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn remote_statement_type(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::Financials => "income_stmt",
        StatementKind::QuarterlyFinancials => "quarterly_income_stmt",
        StatementKind::BalanceSheet => "balance_sheet",
        StatementKind::QuarterlyBalanceSheet => "quarterly_balance_sheet",
        StatementKind::Cashflow => "cashflow",
        StatementKind::QuarterlyCashflow => "quarterly_cashflow",
    }
}

/// Fail when the provider lacks a tool the logical operations map onto.
pub fn check_required_tools(available: &[String]) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_REMOTE_TOOLS
        .iter()
        .copied()
        .filter(|required| !available.iter().any(|name| name == required))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::ToolProviderUnavailable(format!(
            "provider is missing required tools: {}",
            missing.join(", ")
        )))
    }
}

/// News from the provider: a JSON list when possible, else text blocks.
fn parse_remote_news(text: &str) -> Vec<NewsItem> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return items
            .iter()
            .filter_map(|item| {
                let content = item.get("content").unwrap_or(item);
                let title = content.get("title").and_then(Value::as_str)?.to_string();
                let source = content
                    .get("publisher")
                    .or_else(|| content.pointer("/provider/displayName"))
                    .or_else(|| content.get("source"))
                    .and_then(Value::as_str)
                    .unwrap_or("N/A")
                    .to_string();
                let date = content
                    .get("pubDate")
                    .or_else(|| content.get("date"))
                    .and_then(Value::as_str)
                    .map(|d| d.chars().take(10).collect())
                    .unwrap_or_else(|| "N/A".to_string());
                Some(NewsItem {
                    title,
                    source,
                    date,
                })
            })
            .collect();
    }

    text.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .filter_map(|block| {
            let title = block
                .lines()
                .find_map(|line| line.strip_prefix("Title:"))
                .or_else(|| block.lines().next())?
                .trim()
                .to_string();
            Some(NewsItem {
                title,
                source: "Yahoo Finance".to_string(),
                date: "N/A".to_string(),
            })
        })
        .collect()
}

pub struct McpMarketData {
    session: McpSession,
}

impl McpMarketData {
    pub fn new(session: McpSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl MarketDataTools for McpMarketData {
    fn source(&self) -> ToolSource {
        ToolSource::Remote
    }

    async fn stock_snapshot(&self, ticker: &str) -> Result<String> {
        let text = self
            .session
            .call_tool(REMOTE_STOCK_INFO, json!({ "ticker": ticker }))
            .await?;
        if text.trim().is_empty() {
            return Ok(format!("No stock info found for {}", ticker));
        }
        Ok(text)
    }

    async fn price_history(&self, ticker: &str, period: &str) -> Result<String> {
        let text = self
            .session
            .call_tool(
                REMOTE_HISTORY,
                json!({ "ticker": ticker, "period": period, "interval": "1d" }),
            )
            .await?;
        if text.trim().is_empty() || text.trim() == "[]" {
            return Ok(format!("No historical data found for {}", ticker));
        }
        Ok(text)
    }

    async fn financial_statement(&self, ticker: &str, kind: StatementKind) -> Result<String> {
        let text = self
            .session
            .call_tool(
                REMOTE_STATEMENT,
                json!({ "ticker": ticker, "financial_type": remote_statement_type(kind) }),
            )
            .await?;
        if text.trim().is_empty() || text.trim() == "[]" {
            return Ok(format!("No {} data found for {}", kind, ticker));
        }
        Ok(format!("{} for {}:\n{}", kind.title(), ticker, text))
    }

    /// The provider has no ratio tool; ratios come from its info payload.
    async fn computed_ratios(&self, ticker: &str) -> Result<FinancialRatios> {
        let snapshot = match self
            .session
            .call_tool(REMOTE_STOCK_INFO, json!({ "ticker": ticker }))
            .await
        {
            Ok(text) => serde_json::from_str::<CompanySnapshot>(&text).unwrap_or_else(|e| {
                warn!(ticker, error = %e, "Provider info is not parseable for ratios");
                CompanySnapshot::default()
            }),
            Err(e) => {
                warn!(ticker, error = %e, "Provider info unavailable for ratios");
                CompanySnapshot::default()
            }
        };
        Ok(compute_ratios(
            &snapshot,
            &StatementTable::default(),
            &StatementTable::default(),
        ))
    }

    async fn news(&self, ticker: &str) -> Result<Vec<NewsItem>> {
        let text = self
            .session
            .call_tool(REMOTE_NEWS, json!({ "ticker": ticker }))
            .await?;
        Ok(parse_remote_news(&text))
    }
}

/// Connects to the MCP provider at a fixed URL.
pub struct McpConnector {
    client: Client,
    url: String,
}

impl McpConnector {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProviderConnector for McpConnector {
    fn endpoint(&self) -> &str {
        // Query strings carry the provider key.
        self.url.split('?').next().unwrap_or(&self.url)
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataTools>> {
        let session = McpSession::connect(self.client.clone(), self.url.clone()).await?;
        check_required_tools(session.tools())?;
        Ok(Arc::new(McpMarketData::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(3),
            method: methods::TOOLS_LIST,
            params: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" })
        );

        let notification = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: methods::INITIALIZED,
            params: None,
        };
        assert!(serde_json::to_value(&notification).unwrap().get("id").is_none());
    }

    #[test]
    fn test_parse_json_body() {
        let rpc = parse_rpc_body(
            "application/json",
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#,
            1,
        )
        .unwrap();
        assert!(rpc.result.is_some());
    }

    #[test]
    fn test_parse_event_stream_picks_matching_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"content\":[]}}\n\n";
        let rpc = parse_rpc_body("text/event-stream; charset=utf-8", body, 7).unwrap();
        assert_eq!(rpc.id, Some(json!(7)));
    }

    #[test]
    fn test_parse_event_stream_without_response() {
        let err = parse_rpc_body("text/event-stream", "event: ping\n\n", 1).unwrap_err();
        assert!(matches!(err, PipelineError::ToolProviderUnavailable(_)));
    }

    #[test]
    fn test_tool_result_text_joins_parts() {
        let result = json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "line two" }
            ]
        });
        assert_eq!(tool_result_text(&result), "line one\nline two");
    }

    #[test]
    fn test_missing_required_tool() {
        let available: Vec<String> = ["get_stock_info", "get_historical_stock_prices", "get_yahoo_finance_news"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = check_required_tools(&available).unwrap_err();
        assert!(err.to_string().contains("get_financial_statement"));

        let mut complete = available;
        complete.push("get_financial_statement".to_string());
        assert!(check_required_tools(&complete).is_ok());
    }

    #[test]
    fn test_remote_news_from_json_and_text() {
        let json_items = parse_remote_news(
            r#"[{"content":{"title":"Chip demand surges","pubDate":"2024-05-02T12:00:00Z","provider":{"displayName":"Reuters"}}}]"#,
        );
        assert_eq!(json_items[0].title, "Chip demand surges");
        assert_eq!(json_items[0].source, "Reuters");
        assert_eq!(json_items[0].date, "2024-05-02");

        let text_items = parse_remote_news(
            "Title: First story\nSummary: ...\n\nTitle: Second story\nURL: https://example.com",
        );
        assert_eq!(text_items.len(), 2);
        assert_eq!(text_items[1].title, "Second story");
    }

    mod stub {
        use axum::extract::State;
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::{json, Value};
        use std::sync::{Arc, Mutex};

        /// Minimal streamable-HTTP MCP server.
        #[derive(Clone)]
        pub struct StubServer {
            tools: Vec<&'static str>,
            pub sessions: Arc<Mutex<Vec<(String, Option<String>)>>>,
        }

        async fn handle(
            State(stub): State<StubServer>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Response {
            let method = body["method"].as_str().unwrap_or_default().to_string();
            let id = body["id"].clone();
            let session = headers
                .get("mcp-session-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            stub.sessions.lock().unwrap().push((method.clone(), session));

            match method.as_str() {
                "initialize" => (
                    [("mcp-session-id", "stub-session")],
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "2025-03-26",
                            "serverInfo": { "name": "stub", "version": "0.0.1" },
                            "capabilities": { "tools": {} }
                        }
                    })),
                )
                    .into_response(),
                "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
                "tools/list" => {
                    let tools: Vec<Value> =
                        stub.tools.iter().map(|name| json!({ "name": name })).collect();
                    let message = json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tools } });
                    (
                        [("content-type", "text/event-stream")],
                        format!("event: message\ndata: {}\n\n", message),
                    )
                        .into_response()
                }
                "tools/call" => {
                    let ticker = body["params"]["arguments"]["ticker"].as_str().unwrap_or_default();
                    let result = if ticker == "FAIL" {
                        json!({ "content": [{ "type": "text", "text": "ticker lookup failed" }], "isError": true })
                    } else {
                        json!({
                            "content": [{
                                "type": "text",
                                "text": r#"{"currentPrice": 190.0, "trailingPE": 25.0, "longName": "Stub Corp"}"#
                            }]
                        })
                    };
                    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        /// Serve on an ephemeral port; returns the endpoint URL.
        pub async fn spawn(tools: Vec<&'static str>) -> (String, StubServer) {
            let stub = StubServer {
                tools,
                sessions: Arc::new(Mutex::new(Vec::new())),
            };
            let app = Router::new()
                .route("/mcp", post(handle))
                .with_state(stub.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}/mcp", addr), stub)
        }
    }

    fn resolver_for(url: &str) -> crate::tools::ToolSourceResolver {
        crate::tools::ToolSourceResolver::new(
            Some(Arc::new(McpConnector::new(Client::new(), url))),
            crate::testing::fixture_local_tools(),
            &crate::config::Settings::default(),
        )
    }

    #[tokio::test]
    async fn test_session_id_is_carried_after_initialize() {
        let (url, stub) = stub::spawn(REQUIRED_REMOTE_TOOLS.to_vec()).await;
        let session = McpSession::connect(Client::new(), url).await.unwrap();
        assert_eq!(session.tools().len(), 4);

        let text = session
            .call_tool(REMOTE_STOCK_INFO, json!({ "ticker": "AAPL" }))
            .await
            .unwrap();
        assert!(text.contains("Stub Corp"));

        let sessions = stub.sessions.lock().unwrap().clone();
        assert_eq!(sessions[0], ("initialize".to_string(), None));
        for (method, session_id) in &sessions[1..] {
            assert_eq!(session_id.as_deref(), Some("stub-session"), "{}", method);
        }
        let methods: Vec<&str> = sessions.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );
    }

    #[tokio::test]
    async fn test_tool_error_result_is_an_error() {
        let (url, _stub) = stub::spawn(REQUIRED_REMOTE_TOOLS.to_vec()).await;
        let session = McpSession::connect(Client::new(), url).await.unwrap();
        let err = session
            .call_tool(REMOTE_STOCK_INFO, json!({ "ticker": "FAIL" }))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolError(ref msg) if msg.contains("ticker lookup failed")));
    }

    #[tokio::test]
    async fn test_live_provider_resolves_remote() {
        let (url, _stub) = stub::spawn(REQUIRED_REMOTE_TOOLS.to_vec()).await;
        let registry = resolver_for(&url).resolve().await;
        assert_eq!(registry.source(), ToolSource::Remote);

        let ratios = registry
            .dispatch(&crate::models::ToolCall {
                id: "call_1".to_string(),
                name: "calculate_financial_ratios".to_string(),
                arguments: json!({ "ticker": "AAPL" }),
            })
            .await;
        assert!(ratios.contains("- P/E Ratio: 25\n"), "{}", ratios);
    }

    #[tokio::test]
    async fn test_live_provider_missing_tool_falls_back() {
        let (url, stub) = stub::spawn(vec![REMOTE_STOCK_INFO, REMOTE_HISTORY, REMOTE_NEWS]).await;
        let registry = resolver_for(&url).resolve().await;
        assert_eq!(registry.source(), ToolSource::Local);
        assert!(stub
            .sessions
            .lock()
            .unwrap()
            .iter()
            .all(|(method, _)| method != "tools/call"));
    }

    #[test]
    fn test_endpoint_hides_api_key() {
        let connector = McpConnector::new(Client::new(), "https://provider.example/mcp?api_key=secret");
        assert_eq!(connector.endpoint(), "https://provider.example/mcp");
    }
}
