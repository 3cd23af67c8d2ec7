//! Process configuration
//!
//! Read once at start-up from the environment (and `.env` when present), then
//! passed by reference to the workflow and the tool-source resolver.

use crate::error::PipelineError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1";
const DEFAULT_MCP_BASE_URL: &str = "https://server.smithery.ai/@hwangwoohyun-nav/yahoo-finance-mcp/mcp";
const DEFAULT_YAHOO_QUERY_URL: &str = "https://query1.finance.yahoo.com";

/// Hard cap on corrective re-generations per node.
pub const MAX_SCHEMA_RETRIES_CAP: u32 = 3;

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub llm_timeout: Duration,

    /// Preferred remote tool provider. `None` means the local tool set is always used.
    pub mcp_url: Option<String>,
    pub mcp_handshake_timeout: Duration,
    pub tool_timeout: Duration,

    pub yahoo_query_url: String,

    pub max_schema_retries: u32,
    pub max_tool_rounds: u32,
    pub allocation_tolerance: f64,

    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            llm_timeout: Duration::from_secs(180),
            mcp_url: None,
            mcp_handshake_timeout: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(30),
            yahoo_query_url: DEFAULT_YAHOO_QUERY_URL.to_string(),
            max_schema_retries: 1,
            max_tool_rounds: 24,
            allocation_tolerance: 0.5,
            api_port: 8080,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mcp_url = match get("MARKET_DATA_MCP_URL") {
            Some(url) => Some(url),
            None => get("YF_API_KEY")
                .map(|key| format!("{}?api_key={}", DEFAULT_MCP_BASE_URL, key)),
        };

        let max_schema_retries: u32 =
            parse_or(get("MAX_SCHEMA_RETRIES"), "MAX_SCHEMA_RETRIES", defaults.max_schema_retries)?;
        if max_schema_retries > MAX_SCHEMA_RETRIES_CAP {
            return Err(PipelineError::Config(format!(
                "MAX_SCHEMA_RETRIES must be at most {} (got {})",
                MAX_SCHEMA_RETRIES_CAP, max_schema_retries
            )));
        }

        let allocation_tolerance: f64 = parse_or(
            get("ALLOCATION_TOLERANCE"),
            "ALLOCATION_TOLERANCE",
            defaults.allocation_tolerance,
        )?;
        if !allocation_tolerance.is_finite() || allocation_tolerance < 0.0 {
            return Err(PipelineError::Config(format!(
                "ALLOCATION_TOLERANCE must be a non-negative number (got {})",
                allocation_tolerance
            )));
        }

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url)
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENAI_MODEL").unwrap_or(defaults.model),
            llm_timeout: Duration::from_secs(parse_or(
                get("LLM_TIMEOUT_SECS"),
                "LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )?),
            mcp_url,
            mcp_handshake_timeout: Duration::from_secs(parse_or(
                get("MCP_HANDSHAKE_TIMEOUT_SECS"),
                "MCP_HANDSHAKE_TIMEOUT_SECS",
                defaults.mcp_handshake_timeout.as_secs(),
            )?),
            tool_timeout: Duration::from_secs(parse_or(
                get("TOOL_TIMEOUT_SECS"),
                "TOOL_TIMEOUT_SECS",
                defaults.tool_timeout.as_secs(),
            )?),
            yahoo_query_url: get("YAHOO_QUERY_URL")
                .unwrap_or(defaults.yahoo_query_url)
                .trim_end_matches('/')
                .to_string(),
            max_schema_retries,
            max_tool_rounds: parse_or(
                get("MAX_TOOL_ROUNDS"),
                "MAX_TOOL_ROUNDS",
                defaults.max_tool_rounds,
            )?,
            allocation_tolerance,
            api_port: parse_or(
                get("PORT").or_else(|| get("API_PORT")),
                "PORT",
                defaults.api_port,
            )?,
        })
    }

    pub fn require_openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("OPENAI_API_KEY is not set".to_string()))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            PipelineError::Config(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
    }
}
