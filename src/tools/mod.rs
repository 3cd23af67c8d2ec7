//! Tool trait and registry
//!
//! The research node sees five market-data tools under fixed names. Each tool
//! wraps a [`MarketDataTools`] backend (remote provider or local library), so
//! the names and argument shapes do not change with the backend. Tool failures
//! come back to the reasoning service as text, never as errors.

use crate::error::PipelineError;
use crate::models::{FinancialRatios, NewsItem, ToolCall, ToolDescriptor};
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod local;
pub mod mcp;
pub mod resolver;
pub mod yahoo;

pub use local::{LocalMarketData, MarketDataSource};
pub use mcp::McpConnector;
pub use resolver::{ProviderConnector, ToolSourceResolver};
pub use yahoo::YahooFinanceClient;

pub const DEFAULT_HISTORY_PERIOD: &str = "3mo";

pub const HISTORY_PERIODS: [&str; 11] = [
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];

/// Which backend a registry's tools call into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Remote,
    Local,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::Remote => write!(f, "remote"),
            ToolSource::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Financials,
    QuarterlyFinancials,
    BalanceSheet,
    QuarterlyBalanceSheet,
    Cashflow,
    QuarterlyCashflow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 6] = [
        StatementKind::Financials,
        StatementKind::QuarterlyFinancials,
        StatementKind::BalanceSheet,
        StatementKind::QuarterlyBalanceSheet,
        StatementKind::Cashflow,
        StatementKind::QuarterlyCashflow,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Financials => "financials",
            StatementKind::QuarterlyFinancials => "quarterly_financials",
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::QuarterlyBalanceSheet => "quarterly_balance_sheet",
            StatementKind::Cashflow => "cashflow",
            StatementKind::QuarterlyCashflow => "quarterly_cashflow",
        }
    }

    /// Heading used in statement summaries, e.g. `Quarterly_Financials`.
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn is_quarterly(&self) -> bool {
        matches!(
            self,
            StatementKind::QuarterlyFinancials
                | StatementKind::QuarterlyBalanceSheet
                | StatementKind::QuarterlyCashflow
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five logical market-data operations, shared by every backend.
///
/// "No data" conditions are `Ok` with a descriptive text; `Err` is reserved for
/// transport or provider failures.
#[async_trait::async_trait]
pub trait MarketDataTools: Send + Sync {
    fn source(&self) -> ToolSource;
    async fn stock_snapshot(&self, ticker: &str) -> Result<String>;
    async fn price_history(&self, ticker: &str, period: &str) -> Result<String>;
    async fn financial_statement(&self, ticker: &str, kind: StatementKind) -> Result<String>;
    async fn computed_ratios(&self, ticker: &str) -> Result<FinancialRatios>;
    async fn news(&self, ticker: &str) -> Result<Vec<NewsItem>>;
}

/// Trait for a single tool exposed to the reasoning service
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: &Value) -> Result<String>;
}

fn require_ticker(arguments: &Value) -> Result<String> {
    if !arguments.is_object() {
        return Err(PipelineError::InvalidToolInput(
            "tool arguments must be a JSON object".to_string(),
        ));
    }
    arguments
        .get("ticker")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::InvalidToolInput("Expected 'ticker' string".to_string()))
}

fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn ticker_schema(extra: Option<(&str, Value)>) -> Value {
    let mut properties = json!({
        "ticker": { "type": "string", "description": "Stock ticker symbol, e.g. AAPL" }
    });
    let mut required = vec!["ticker".to_string()];
    if let Some((name, schema)) = extra {
        properties[name] = schema;
        required.push(name.to_string());
    }
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
        "required": required,
    })
}

pub struct StockInfoTool {
    backend: Arc<dyn MarketDataTools>,
}

#[async_trait::async_trait]
impl Tool for StockInfoTool {
    fn name(&self) -> &'static str {
        "get_stock_info"
    }

    fn description(&self) -> &'static str {
        "Get comprehensive stock information including current price, market cap, and company details."
    }

    fn parameters(&self) -> Value {
        ticker_schema(None)
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let ticker = require_ticker(arguments)?;
        self.backend.stock_snapshot(&ticker).await
    }
}

pub struct StockHistoryTool {
    backend: Arc<dyn MarketDataTools>,
}

#[async_trait::async_trait]
impl Tool for StockHistoryTool {
    fn name(&self) -> &'static str {
        "get_stock_history"
    }

    fn description(&self) -> &'static str {
        "Get historical stock price data. Period options: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max. Default period should be '3mo'."
    }

    fn parameters(&self) -> Value {
        ticker_schema(Some((
            "period",
            json!({ "type": "string", "enum": HISTORY_PERIODS }),
        )))
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let ticker = require_ticker(arguments)?;
        let period = optional_str(arguments, "period").unwrap_or(DEFAULT_HISTORY_PERIOD);
        if !HISTORY_PERIODS.contains(&period) {
            return Ok(format!(
                "Invalid period: {}. Valid periods: {}",
                period,
                HISTORY_PERIODS.join(", ")
            ));
        }
        self.backend.price_history(&ticker, period).await
    }
}

pub struct FinancialStatementsTool {
    backend: Arc<dyn MarketDataTools>,
}

#[async_trait::async_trait]
impl Tool for FinancialStatementsTool {
    fn name(&self) -> &'static str {
        "get_financial_statements"
    }

    fn description(&self) -> &'static str {
        "Get financial statements. Types: financials, quarterly_financials, balance_sheet, quarterly_balance_sheet, cashflow, quarterly_cashflow. Default should be 'financials'."
    }

    fn parameters(&self) -> Value {
        let kinds: Vec<&str> = StatementKind::ALL.iter().map(|k| k.as_str()).collect();
        ticker_schema(Some((
            "statement_type",
            json!({ "type": "string", "enum": kinds }),
        )))
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let ticker = require_ticker(arguments)?;
        let statement_type = optional_str(arguments, "statement_type")
            .unwrap_or(StatementKind::Financials.as_str());
        match StatementKind::parse(statement_type) {
            Some(kind) => self.backend.financial_statement(&ticker, kind).await,
            None => Ok(format!("Invalid statement type: {}", statement_type)),
        }
    }
}

pub struct FinancialRatiosTool {
    backend: Arc<dyn MarketDataTools>,
}

#[async_trait::async_trait]
impl Tool for FinancialRatiosTool {
    fn name(&self) -> &'static str {
        "calculate_financial_ratios"
    }

    fn description(&self) -> &'static str {
        "Calculate key financial ratios for a stock using available financial data. Unavailable ratios are 0.0."
    }

    fn parameters(&self) -> Value {
        ticker_schema(None)
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let ticker = require_ticker(arguments)?;
        let ratios = self.backend.computed_ratios(&ticker).await?;
        Ok(format_ratios(&ticker, &ratios))
    }
}

pub struct StockNewsTool {
    backend: Arc<dyn MarketDataTools>,
}

#[async_trait::async_trait]
impl Tool for StockNewsTool {
    fn name(&self) -> &'static str {
        "get_stock_news"
    }

    fn description(&self) -> &'static str {
        "Get recent news headlines for a stock as a list of title, source and date."
    }

    fn parameters(&self) -> Value {
        ticker_schema(None)
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let ticker = require_ticker(arguments)?;
        let items = self.backend.news(&ticker).await?;
        Ok(format_news(&ticker, &items))
    }
}

pub fn format_ratios(ticker: &str, ratios: &FinancialRatios) -> String {
    format!(
        "Calculated Financial Ratios for {}:\n\
         - P/E Ratio: {}\n\
         - EV/EBITDA: {}\n\
         - ROE: {}%\n\
         - Debt-to-Equity: {}\n\
         - Price-to-Book: {}\n\
         - Current Ratio: {}\n\
         - Gross Margin: {}%\n\
         - Operating Margin: {}%\n\n\
         Note: All ratios calculated from available data. Zero values indicate data not available or not applicable.\n",
        ticker,
        ratios.pe_ratio,
        ratios.ev_ebitda,
        ratios.roe,
        ratios.debt_to_equity,
        ratios.price_to_book,
        ratios.current_ratio,
        ratios.gross_margin,
        ratios.operating_margin,
    )
}

pub fn format_news(ticker: &str, items: &[NewsItem]) -> String {
    if items.is_empty() {
        return format!("No news found for {}", ticker);
    }
    let mut out = format!("Recent news for {}:\n", ticker);
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({}, {})\n",
            i + 1,
            item.title,
            item.source,
            item.date
        ));
    }
    out
}

/// Tool registry for looking up and dispatching tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    source: ToolSource,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(source: ToolSource, call_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            source,
            call_timeout,
        }
    }

    /// Registry exposing the five market-data tools over one backend.
    pub fn for_backend(backend: Arc<dyn MarketDataTools>, call_timeout: Duration) -> Self {
        let mut registry = Self::new(backend.source(), call_timeout);
        registry.register(Arc::new(StockInfoTool {
            backend: backend.clone(),
        }));
        registry.register(Arc::new(StockHistoryTool {
            backend: backend.clone(),
        }));
        registry.register(Arc::new(FinancialStatementsTool {
            backend: backend.clone(),
        }));
        registry.register(Arc::new(FinancialRatiosTool {
            backend: backend.clone(),
        }));
        registry.register(Arc::new(StockNewsTool { backend }));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn source(&self) -> ToolSource {
        self.source
    }

    /// Tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors advertised to the reasoning service, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Run a requested tool call and return its output text.
    ///
    /// Unknown tools, bad arguments, timeouts and upstream failures all become
    /// result text the reasoning service can read.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return format!(
                "Unknown tool: {}. Available tools: {}",
                call.name,
                self.list().join(", ")
            );
        };

        info!(tool = %call.name, source = %self.source, "Executing tool");

        match tokio::time::timeout(self.call_timeout, tool.execute(&call.arguments)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                format!("Error running {}: {}", call.name, e)
            }
            Err(_) => {
                warn!(tool = %call.name, "Tool call timed out");
                format!(
                    "Error running {}: timed out after {}s",
                    call.name,
                    self.call_timeout.as_secs()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureMarketSource;

    fn registry() -> ToolRegistry {
        let backend: Arc<dyn MarketDataTools> =
            Arc::new(LocalMarketData::new(Arc::new(FixtureMarketSource::default())));
        ToolRegistry::for_backend(backend, Duration::from_secs(5))
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_registry_exposes_five_logical_tools() {
        let registry = registry();
        assert_eq!(
            registry.list(),
            vec![
                "calculate_financial_ratios",
                "get_financial_statements",
                "get_stock_history",
                "get_stock_info",
                "get_stock_news",
            ]
        );
        assert_eq!(registry.source(), ToolSource::Local);
        assert_eq!(registry.descriptors().len(), 5);
    }

    #[test]
    fn test_statement_kind_titles() {
        assert_eq!(StatementKind::Financials.title(), "Financials");
        assert_eq!(
            StatementKind::QuarterlyBalanceSheet.title(),
            "Quarterly_Balance_Sheet"
        );
        assert_eq!(StatementKind::parse("cashflow"), Some(StatementKind::Cashflow));
        assert_eq!(StatementKind::parse("income"), None);
    }

    #[tokio::test]
    async fn test_unknown_ticker_info_is_not_an_error() {
        let backend: Arc<dyn MarketDataTools> = Arc::new(LocalMarketData::new(Arc::new(
            FixtureMarketSource::with_empty(&["ZZZZQ"]),
        )));
        let registry = ToolRegistry::for_backend(backend, Duration::from_secs(5));
        let output = registry
            .dispatch(&call("get_stock_info", json!({ "ticker": "ZZZZQ" })))
            .await;
        assert_eq!(output, "No stock info found for ZZZZQ");
    }

    #[tokio::test]
    async fn test_invalid_statement_type_is_text() {
        let output = registry()
            .dispatch(&call(
                "get_financial_statements",
                json!({ "ticker": "AAPL", "statement_type": "income" }),
            ))
            .await;
        assert_eq!(output, "Invalid statement type: income");
    }

    #[tokio::test]
    async fn test_history_defaults_to_three_months() {
        let output = registry()
            .dispatch(&call("get_stock_history", json!({ "ticker": "aapl" })))
            .await;
        assert!(output.starts_with("Historical prices for AAPL (last 10 days from 3mo period):"));
    }

    #[tokio::test]
    async fn test_missing_ticker_becomes_error_text() {
        let output = registry()
            .dispatch(&call("get_stock_info", json!({})))
            .await;
        assert!(output.starts_with("Error running get_stock_info: Invalid tool input"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_text() {
        let output = registry()
            .dispatch(&call("get_stock_actions", json!({ "ticker": "AAPL" })))
            .await;
        assert!(output.starts_with("Unknown tool: get_stock_actions"));
    }

    #[test]
    fn test_format_news_lists_items() {
        let items = vec![NewsItem {
            title: "Apple beats estimates".to_string(),
            source: "Reuters".to_string(),
            date: "2024-05-02".to_string(),
        }];
        assert_eq!(
            format_news("AAPL", &items),
            "Recent news for AAPL:\n1. Apple beats estimates (Reuters, 2024-05-02)\n"
        );
        assert_eq!(format_news("ZZZZ", &[]), "No news found for ZZZZ");
    }
}
