//! OpenAI-compatible chat-completions client
//!
//! Requests strict `json_schema` output and advertises market-data tools as
//! functions. Uses one long-lived reqwest::Client for connection pooling.

use crate::config::Settings;
use crate::error::PipelineError;
use crate::llm::{correction_prompt, ReasoningRequest, ReasoningResponse, ReasoningService, Turn};
use crate::models::ToolCall;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.llm_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: settings.openai_base_url.clone(),
            model: settings.model.clone(),
        })
    }

    fn build_body(&self, request: &ReasoningRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(request),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name(),
                    "strict": true,
                    "schema": request.schema.json_schema(),
                }
            }
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

#[async_trait]
impl ReasoningService for OpenAiClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        info!(
            role = %request.role,
            schema = request.schema.name(),
            tools = request.tools.len(),
            turns = request.transcript.len(),
            "Calling completion API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                PipelineError::LlmError(format!("completion request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Completion API error response: {}", error_text);
            return Err(PipelineError::LlmError(format!(
                "completion API returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse completion response: {}", e);
            PipelineError::LlmError(format!("malformed completion: {}", e))
        })?;

        parse_completion(completion)
    }
}

fn build_messages(request: &ReasoningRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2 + request.transcript.len());
    messages.push(json!({ "role": "system", "content": request.system_prompt }));
    messages.push(json!({ "role": "user", "content": request.context }));

    for turn in &request.transcript {
        match turn {
            Turn::ToolRequests(calls) => {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                messages.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": tool_calls,
                }));
            }
            Turn::ToolResult {
                call_id, content, ..
            } => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": content,
                }));
            }
            Turn::Correction { rejected, issues } => {
                messages.push(json!({ "role": "assistant", "content": rejected }));
                messages.push(json!({
                    "role": "user",
                    "content": correction_prompt(request.schema, issues),
                }));
            }
        }
    }

    messages
}

fn parse_completion(completion: ChatCompletionResponse) -> Result<ReasoningResponse> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::LlmError("completion has no choices".to_string()))?;

    debug!(finish_reason = ?choice.finish_reason, "Completion received");

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(PipelineError::LlmRefusal(refusal));
    }

    if let Some(calls) = choice.message.tool_calls.filter(|c| !c.is_empty()) {
        let calls = calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments)),
            })
            .collect();
        return Ok(ReasoningResponse::ToolCalls(calls));
    }

    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(ReasoningResponse::Structured(content)),
        _ => Err(PipelineError::LlmError(format!(
            "completion carried neither content nor tool calls (finish_reason={:?})",
            choice.finish_reason
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolDescriptor;
    use crate::validation::OutputSchema;

    fn client() -> OpenAiClient {
        let settings = Settings {
            openai_api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        OpenAiClient::from_settings(&settings).unwrap()
    }

    fn request(transcript: Vec<Turn>) -> ReasoningRequest {
        ReasoningRequest {
            role: "stock_research_agent".to_string(),
            system_prompt: "You are an analyst.".to_string(),
            context: "CLIENT PROFILE:\n...".to_string(),
            schema: OutputSchema::StockReport,
            tools: vec![ToolDescriptor {
                name: "get_stock_info".to_string(),
                description: "Snapshot".to_string(),
                parameters: json!({ "type": "object" }),
            }],
            transcript,
        }
    }

    #[test]
    fn test_requires_api_key() {
        assert!(OpenAiClient::from_settings(&Settings::default()).is_err());
    }

    #[test]
    fn test_body_carries_schema_and_tools() {
        let body = client().build_body(&request(vec![]));
        assert_eq!(body["response_format"]["json_schema"]["name"], "StockReport");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "get_stock_info");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_transcript_maps_to_chat_messages() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_stock_info".to_string(),
            arguments: json!({ "ticker": "AAPL" }),
        };
        let messages = build_messages(&request(vec![
            Turn::ToolRequests(vec![call]),
            Turn::ToolResult {
                call_id: "call_1".to_string(),
                name: "get_stock_info".to_string(),
                content: "Stock Info for AAPL".to_string(),
            },
            Turn::Correction {
                rejected: "{}".to_string(),
                issues: vec!["missing field `ticker`".to_string()],
            },
        ]));

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{\"ticker\":\"AAPL\"}");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(messages[4]["content"], "{}");
        assert!(messages[5]["content"]
            .as_str()
            .unwrap()
            .contains("missing field `ticker`"));
    }

    #[test]
    fn test_parse_structured_completion() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "{\"a\":1}" }, "finish_reason": "stop" }]
        }))
        .unwrap();
        assert_eq!(
            parse_completion(completion).unwrap(),
            ReasoningResponse::Structured("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_parse_tool_call_completion() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "get_stock_history", "arguments": "{\"ticker\":\"MSFT\",\"period\":\"3mo\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let ReasoningResponse::ToolCalls(calls) = parse_completion(completion).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].name, "get_stock_history");
        assert_eq!(calls[0].arguments["period"], "3mo");
    }

    #[test]
    fn test_parse_refusal() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null, "refusal": "I can't help." }, "finish_reason": "stop" }]
        }))
        .unwrap();
        assert!(matches!(
            parse_completion(completion),
            Err(PipelineError::LlmRefusal(_))
        ));
    }

    #[test]
    fn test_parse_empty_choices() {
        let completion = ChatCompletionResponse { choices: vec![] };
        assert!(matches!(
            parse_completion(completion),
            Err(PipelineError::LlmError(_))
        ));
    }
}
