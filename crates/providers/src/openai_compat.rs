//! OpenAI-compatible provider implementation.
//!
//! Works with Ollama (`/v1`), vLLM, LM Studio, OpenAI, OpenRouter and any
//! other endpoint that exposes `/chat/completions` with function calling.

use async_trait::async_trait;
use legion_config::ProviderConfig;
use legion_core::error::ProviderError;
use legion_core::message::{Content, Role};
use legion_core::provider::*;
use legion_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// Fails only if the HTTP client cannot be constructed (e.g. no TLS
    /// backend available).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    /// Create a provider from the `[provider]` config section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::new(
            config.name.clone(),
            config.api_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Create a local Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            Duration::from_secs(300),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert history entries to OpenAI API format.
    fn to_api_messages(messages: &[Content]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.text.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: encode_arguments(&tc.arguments),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Convert an API reply message into an assistant history entry.
    fn from_api_message(message: ApiMessage) -> Content {
        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, tc)| ToolCall {
                id: if tc.id.is_empty() {
                    format!("call_{index}")
                } else {
                    tc.id
                },
                name: tc.function.name,
                arguments: decode_arguments(tc.function.arguments),
            })
            .collect();

        Content::assistant(message.content.unwrap_or_default()).with_tool_calls(tool_calls)
    }
}

/// The wire format carries arguments as a JSON-encoded string.
fn encode_arguments(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(_) => arguments.clone(),
        serde_json::Value::Null => serde_json::Value::String("{}".into()),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Some servers (Ollama among them) send an object instead of a string.
/// Undecodable strings are kept as-is so argument validation can report them.
fn decode_arguments(arguments: serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(s) if s.trim().is_empty() => serde_json::Value::Null,
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))
        }
        other => other,
    }
}

#[async_trait]
impl legion_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message: Self::from_api_message(choice.message),
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use legion_core::Provider;

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn from_config_trims_trailing_slash() {
        let config = ProviderConfig {
            api_url: "http://gpu-box:8000/v1/".into(),
            api_key: Some(String::new()),
            ..ProviderConfig::default()
        };
        let provider = OpenAiCompatProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url(), "http://gpu-box:8000/v1");
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Content::system("You are helpful"), Content::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "get_current_time".into(),
            description: "Get the current time".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "get_current_time");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn assistant_tool_calls_encode_arguments_as_string() {
        let entry = Content::assistant("").with_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "wait".into(),
            arguments: serde_json::json!({"milliseconds": 100}),
        }]);
        let api = OpenAiCompatProvider::to_api_messages(&[entry]);
        let calls = api[0].tool_calls.as_ref().unwrap();
        assert_eq!(
            calls[0].function.arguments,
            serde_json::Value::String(r#"{"milliseconds":100}"#.into())
        );
    }

    #[test]
    fn tool_result_keeps_call_id() {
        let api = OpenAiCompatProvider::to_api_messages(&[Content::tool_result("call_9", "ok")]);
        assert_eq!(api[0].role, "tool");
        assert_eq!(api[0].tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn parse_response_with_string_arguments() {
        let raw = r#"{
            "model": "llama3.2",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_a", "type": "function",
                 "function": {"name": "wait", "arguments": "{\"milliseconds\": 5}"}}
            ]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        let choice = parsed.choices.into_iter().next().unwrap();
        let content = OpenAiCompatProvider::from_api_message(choice.message);
        assert_eq!(content.role, Role::Assistant);
        assert_eq!(content.text, "");
        assert_eq!(content.tool_calls.len(), 1);
        assert_eq!(content.tool_calls[0].id, "call_a");
        assert_eq!(
            content.tool_calls[0].arguments,
            serde_json::json!({"milliseconds": 5})
        );
    }

    #[test]
    fn parse_response_with_object_arguments_and_no_id() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "", "tool_calls": [
                {"function": {"name": "get_current_time", "arguments": {}}}
            ]}}]
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.model.is_none());
        let choice = parsed.choices.into_iter().next().unwrap();
        let content = OpenAiCompatProvider::from_api_message(choice.message);
        assert_eq!(content.tool_calls[0].id, "call_0");
        assert_eq!(content.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn decode_arguments_edge_cases() {
        assert_eq!(
            decode_arguments(serde_json::Value::String("  ".into())),
            serde_json::Value::Null
        );
        assert_eq!(
            decode_arguments(serde_json::Value::String("not json".into())),
            serde_json::Value::String("not json".into())
        );
    }
}
