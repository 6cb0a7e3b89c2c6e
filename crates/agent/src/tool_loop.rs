//! The tool-call loop: model ↔ tool negotiation until a final answer.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::try_join_all;
use legion_config::AgentConfig;
use legion_core::event::{DomainEvent, EventBus};
use legion_core::message::Content;
use legion_core::provider::{Provider, ProviderRequest, ToolDefinition};
use legion_core::tool::{Tool, ToolCall, ToolRegistry};
use legion_core::{CancellationToken, Error, ToolError};
use tracing::{debug, info, warn};

/// Bounds on a single loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    /// Rounds in which tools may be executed before the loop gives up.
    pub max_tool_rounds: u32,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self { max_tool_rounds: 10 }
    }
}

impl From<&AgentConfig> for LoopPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_tool_rounds: config.max_tool_rounds,
        }
    }
}

/// Drives one conversation through the model, executing requested tools.
pub struct ToolCallLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Executes the tools the model asks for
    registry: Arc<dyn ToolRegistry>,

    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    policy: LoopPolicy,

    /// Optional sink for `ModelResponded` / `ToolExecuted`
    events: Option<Arc<EventBus>>,
}

impl ToolCallLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<dyn ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            policy: LoopPolicy::default(),
            events: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_policy(mut self, policy: LoopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> LoopPolicy {
        self.policy
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Run the loop over `history`, offering `tools` to the model.
    ///
    /// Returns the history with the final assistant entry appended and all
    /// intermediate entries (tool results and the assistant entries that
    /// requested them) removed. Tool and backend errors abort the loop.
    pub async fn chat(
        &self,
        mut history: Vec<Content>,
        tools: &[Arc<dyn Tool>],
        cancel: CancellationToken,
    ) -> legion_core::Result<Vec<Content>> {
        let definitions: Vec<ToolDefinition> = tools.iter().map(|t| t.to_definition()).collect();
        let mut rounds = 0u32;

        loop {
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: history.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
            };

            debug!(
                round = rounds,
                messages = request.messages.len(),
                tools = request.tools.len(),
                "Calling model"
            );

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                response = self.provider.complete(request) => response?,
            };

            self.publish(DomainEvent::ModelResponded {
                model: response.model.clone(),
                tool_calls: response.message.tool_calls.len(),
                tokens_used: response.usage.as_ref().map(|u| u.total_tokens),
                timestamp: Utc::now(),
            });

            let assistant = response.message;
            if assistant.tool_calls.is_empty() {
                info!(rounds, "Model produced final answer");
                history.push(assistant);
                history.retain(|entry| !entry.is_intermediate());
                return Ok(history);
            }

            if rounds >= self.policy.max_tool_rounds {
                warn!(rounds, "Tool round budget exhausted");
                return Err(Error::RoundBudgetExhausted { rounds });
            }
            rounds += 1;

            debug!(
                round = rounds,
                tool_count = assistant.tool_calls.len(),
                "Executing tool calls"
            );

            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = self.execute_round(&assistant.tool_calls, tools, &cancel) => results?,
            };

            history.push(assistant);
            history.extend(results);
        }
    }

    /// Execute one round of calls concurrently; results keep issue order.
    async fn execute_round(
        &self,
        calls: &[ToolCall],
        tools: &[Arc<dyn Tool>],
        cancel: &CancellationToken,
    ) -> Result<Vec<Content>, ToolError> {
        try_join_all(calls.iter().map(|call| self.execute_call(call, tools, cancel.clone()))).await
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        tools: &[Arc<dyn Tool>],
        cancel: CancellationToken,
    ) -> Result<Content, ToolError> {
        let tool = tools
            .iter()
            .find(|t| t.name() == call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let start = Instant::now();
        let result = self.registry.invoke(tool.as_ref(), call, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool finished");
                Ok(Content::tool_result(call.id.clone(), output))
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                Err(e)
            }
        }
    }
}
