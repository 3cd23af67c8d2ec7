//! Tool-source selection
//!
//! Tries the preferred remote provider under a handshake timeout and falls back
//! to the local tool set on any failure. Resolution never fails.

use crate::config::Settings;
use crate::error::PipelineError;
use crate::tools::{LocalMarketData, McpConnector, MarketDataTools, ToolRegistry, YahooFinanceClient};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Opens a session with a remote tool provider.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Endpoint for logs, without credentials.
    fn endpoint(&self) -> &str;
    async fn connect(&self) -> Result<Arc<dyn MarketDataTools>>;
}

pub struct ToolSourceResolver {
    connector: Option<Arc<dyn ProviderConnector>>,
    local: Arc<dyn MarketDataTools>,
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl ToolSourceResolver {
    pub fn new(
        connector: Option<Arc<dyn ProviderConnector>>,
        local: Arc<dyn MarketDataTools>,
        settings: &Settings,
    ) -> Self {
        Self {
            connector,
            local,
            handshake_timeout: settings.mcp_handshake_timeout,
            call_timeout: settings.tool_timeout,
        }
    }

    /// Remote MCP provider when `mcp_url` is set, Yahoo-backed local tools otherwise.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let connector: Option<Arc<dyn ProviderConnector>> = match &settings.mcp_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(settings.tool_timeout)
                    .build()
                    .map_err(|e| {
                        PipelineError::Config(format!("Failed to build MCP HTTP client: {}", e))
                    })?;
                Some(Arc::new(McpConnector::new(client, url.clone())))
            }
            None => None,
        };
        let yahoo = YahooFinanceClient::from_settings(settings)?;
        let local: Arc<dyn MarketDataTools> = Arc::new(LocalMarketData::new(Arc::new(yahoo)));

        Ok(Self::new(connector, local, settings))
    }

    /// Registry over the remote provider when its handshake succeeds in time,
    /// else over the local tool set.
    pub async fn resolve(&self) -> ToolRegistry {
        let Some(connector) = &self.connector else {
            info!("No remote tool provider configured, using local tools");
            return self.local_registry();
        };

        let attempt = tokio::time::timeout(self.handshake_timeout, connector.connect()).await;
        let failure = match attempt {
            Ok(Ok(remote)) => {
                info!(endpoint = connector.endpoint(), "Using remote tool provider");
                return ToolRegistry::for_backend(remote, self.call_timeout);
            }
            Ok(Err(e)) => e,
            Err(_) => PipelineError::Timeout {
                operation: "remote tool provider handshake".to_string(),
                seconds: self.handshake_timeout.as_secs(),
            },
        };

        warn!(
            endpoint = connector.endpoint(),
            error = %failure,
            "Falling back to local tools"
        );
        self.local_registry()
    }

    fn local_registry(&self) -> ToolRegistry {
        ToolRegistry::for_backend(self.local.clone(), self.call_timeout)
    }
}
