//! REST API Server for the Analyst Pipeline
//!
//! Exposes pipeline runs and the resolved market-data tool set over HTTP

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Settings;
use crate::error::PipelineError;
use crate::llm::OpenAiClient;
use crate::models::{ClientProfile, ClientProfileInput, ToolCall};
use crate::tools::ToolSourceResolver;
use crate::workflow::{build_default_workflow, Workflow};

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<Workflow>,
    pub resolver: Arc<ToolSourceResolver>,
}

impl ApiState {
    pub fn from_settings(settings: &Settings) -> crate::Result<Self> {
        let reasoner = Arc::new(OpenAiClient::from_settings(settings)?);
        let resolver = Arc::new(ToolSourceResolver::from_settings(settings)?);
        let workflow = build_default_workflow(settings, reasoner, resolver.clone())?;
        Ok(Self {
            workflow: Arc::new(workflow),
            resolver,
        })
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    if err.is_configuration() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match err {
        PipelineError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::NodeFailed { source, .. } => match source.as_ref() {
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Pipeline Endpoint
/// =============================

pub(crate) async fn run_pipeline(
    State(state): State<ApiState>,
    Json(input): Json<ClientProfileInput>,
) -> (StatusCode, Json<ApiResponse>) {
    let profile = match ClientProfile::try_from(input) {
        Ok(profile) => profile,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!("Invalid client profile: {}", e))),
            )
        }
    };

    info!(
        risk_tolerance = profile.risk_tolerance(),
        cash_flow = profile.cash_flow(),
        "Received pipeline request"
    );

    let run = match state.workflow.run(profile).await {
        Ok(run) => run,
        Err(e) => {
            error!(error = %e, "Pipeline run failed");
            return (
                status_for(&e),
                Json(ApiResponse::error(format!("Pipeline run failed: {}", e))),
            );
        }
    };

    match run.final_portfolio() {
        Ok(portfolio) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({
                "run_id": run.run_id,
                "portfolio": portfolio,
                "messages": run.messages,
                "visited": run.visited,
                "reasoning_trace": run.reasoning_trace,
                "tool_source": run.tool_source,
                "elapsed_ms": run.elapsed_ms,
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Final message is not a portfolio: {}", e))),
        ),
    }
}

/// =============================
/// Market Data Endpoints
/// =============================

pub(crate) async fn stock_snapshot(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("ticker is required".into())),
        );
    }

    let registry = state.resolver.resolve().await;
    let text = registry
        .dispatch(&ToolCall {
            id: "api".to_string(),
            name: "get_stock_info".to_string(),
            arguments: json!({ "ticker": ticker }),
        })
        .await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(json!({
            "ticker": ticker,
            "tool_source": registry.source(),
            "snapshot": text,
        }))),
    )
}

pub(crate) async fn list_tools(State(state): State<ApiState>) -> Json<ApiResponse> {
    let registry = state.resolver.resolve().await;
    Json(ApiResponse::success(json!({
        "tool_source": registry.source(),
        "tools": registry.descriptors(),
    })))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/pipeline/run", post(run_pipeline))
        .route("/api/v1/tools", get(list_tools))
        .route("/api/v1/stocks/:ticker/snapshot", get(stock_snapshot))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ReasoningResponse;
    use crate::testing::{
        client_summary_json, fixture_local_tools, portfolio_json, stock_report_json,
        ScriptedReasoner,
    };
    use crate::tools::ToolSource;
    use chrono::NaiveDate;

    fn state(script: Vec<ReasoningResponse>) -> ApiState {
        let settings = Settings::default();
        let resolver = Arc::new(ToolSourceResolver::new(None, fixture_local_tools(), &settings));
        let workflow = build_default_workflow(
            &settings,
            Arc::new(ScriptedReasoner::new(script)),
            resolver.clone(),
        )
        .unwrap();
        ApiState {
            workflow: Arc::new(workflow),
            resolver,
        }
    }

    fn input(risk_tolerance: i64) -> ClientProfileInput {
        ClientProfileInput {
            risk_tolerance,
            investment_goals: "aggressive growth for retirement".to_string(),
            cash_flow: 100_000,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2034, 1, 1),
        }
    }

    #[tokio::test]
    async fn test_run_returns_final_portfolio() {
        let state = state(vec![
            ReasoningResponse::Structured(client_summary_json()),
            ReasoningResponse::Structured(portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 15.0])),
            ReasoningResponse::Structured(stock_report_json()),
            ReasoningResponse::Structured(portfolio_json(&[25.0, 15.0, 15.0, 15.0, 15.0, 15.0])),
        ]);

        let (status, Json(response)) = run_pipeline(State(state), Json(input(7))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["portfolio"]["total_allocation"], 100.0);
        assert_eq!(data["visited"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_profile_is_bad_request() {
        let (status, Json(response)) = run_pipeline(State(state(vec![])), Json(input(11))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response.error.unwrap().contains("risk_tolerance"));
    }

    #[tokio::test]
    async fn test_node_failure_maps_to_bad_gateway() {
        let (status, Json(response)) = run_pipeline(State(state(vec![])), Json(input(5))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_snapshot_uses_resolved_tools() {
        let (status, Json(response)) =
            stock_snapshot(State(state(vec![])), Path("aapl".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        let data = response.data.unwrap();
        assert_eq!(data["ticker"], "AAPL");
        assert_eq!(data["tool_source"], json!(ToolSource::Local));
        assert!(data["snapshot"].as_str().unwrap().contains("AAPL"));
    }

    #[tokio::test]
    async fn test_tool_listing() {
        let Json(response) = list_tools(State(state(vec![]))).await;
        let data = response.data.unwrap();
        assert_eq!(data["tools"].as_array().unwrap().len(), 5);
    }
}
