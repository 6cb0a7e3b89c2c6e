//! Conversation orchestrator: the public entry point.
//!
//! `chat` posts a request on the bus and waits for the correlated
//! response. The orchestrator's own subscriber answers every request by
//! running the tool-call loop and posting the final assistant entry back
//! under the same conversation id.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use legion_config::AppConfig;
use legion_core::bus::{MessageBus, MessageHandler};
use legion_core::event::{DomainEvent, EventBus};
use legion_core::message::{Content, ConversationId, Message, Role};
use legion_core::provider::Provider;
use legion_core::tool::ToolRegistry;
use legion_core::{BusError, CancellationToken, Error, Result};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::tool_loop::{LoopPolicy, ToolCallLoop};

/// Caller-supplied conversation content.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub content: Vec<Content>,
}

impl ChatRequest {
    pub fn new(content: Vec<Content>) -> Self {
        Self { content }
    }

    /// A request holding one user entry.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Content::user(text)])
    }
}

/// The correlated answer to a [`ChatRequest`].
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub conversation_id: ConversationId,
    pub content: Vec<Content>,
}

impl ChatResponse {
    /// Text of the first response entry.
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(|c| c.text.as_str())
    }
}

/// The built-in subscriber that turns requests into responses.
struct ConversationHandler {
    bus: Weak<MessageBus>,
    registry: Arc<dyn ToolRegistry>,
    tool_loop: ToolCallLoop,
    system_prompt: Option<String>,
    events: Option<Arc<EventBus>>,
}

impl ConversationHandler {
    async fn answer(&self, request: &Message, cancel: CancellationToken) -> Result<Content> {
        let tools = self.registry.list_tools(&cancel).await?;
        debug!(tools = tools.len(), "Fetched tool catalog");

        let mut history = Vec::with_capacity(request.content.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            history.push(Content::system(prompt.clone()));
        }
        history.extend(request.content.iter().cloned());

        let history = self.tool_loop.chat(history, &tools, cancel).await?;
        history
            .into_iter()
            .last()
            .filter(|entry| entry.role == Role::Assistant)
            .ok_or_else(|| Error::Internal("tool-call loop returned no assistant entry".into()))
    }
}

#[async_trait]
impl MessageHandler for ConversationHandler {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn handle(&self, message: Arc<Message>, cancel: CancellationToken) -> Result<()> {
        if !message.is_request() {
            return Ok(());
        }
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        let conversation_id = message.conversation_id.clone();

        let response = match self.answer(&message, cancel.clone()).await {
            Ok(entry) => Message::response(conversation_id, vec![entry]),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Request failed, posting fault response");
                if let Some(events) = &self.events {
                    events.publish(DomainEvent::HandlerFault {
                        conversation_id: conversation_id.to_string(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Message::fault(conversation_id, e.to_string())
            }
        };

        bus.post(response, cancel).await?;
        Ok(())
    }
}

/// Entry point for conversations.
pub struct Orchestrator {
    bus: Arc<MessageBus>,
    handler: Arc<dyn MessageHandler>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Post `request` under a fresh conversation id and wait for its answer.
    ///
    /// A fault response from the subscriber surfaces as
    /// [`BusError::HandlerFault`].
    pub async fn chat(&self, request: ChatRequest, cancel: CancellationToken) -> Result<ChatResponse> {
        let message = Message::request(request.content);
        let conversation_id = message.conversation_id.clone();
        let span = info_span!("chat", conversation_id = %conversation_id);

        async {
            info!(entries = message.content.len(), "Starting conversation");
            let response = self.bus.post(message, cancel).await?;

            if let Some(reason) = &response.error {
                return Err(BusError::HandlerFault {
                    conversation_id: conversation_id.clone(),
                    reason: reason.clone(),
                }
                .into());
            }

            info!(entries = response.content.len(), "Conversation resolved");
            Ok(ChatResponse {
                conversation_id: conversation_id.clone(),
                content: response.content.clone(),
            })
        }
        .instrument(span)
        .await
    }

    /// Send one user entry and return the text of the first response entry.
    pub async fn chat_text(&self, text: &str, cancel: CancellationToken) -> Result<String> {
        let response = self.chat(ChatRequest::text(text), cancel).await?;
        response
            .text()
            .map(str::to_owned)
            .ok_or_else(|| Error::Internal("response carried no content".into()))
    }

    /// The bus this orchestrator posts on, for diagnostics and extra subscribers.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.handler);
    }
}

/// Assembles an [`Orchestrator`] from its collaborators.
#[derive(Default)]
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn Provider>>,
    registry: Option<Arc<dyn ToolRegistry>>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    policy: LoopPolicy,
    system_prompt: Option<String>,
    bus: Option<Arc<MessageBus>>,
    events: Option<Arc<EventBus>>,
}

impl OrchestratorBuilder {
    /// Take model, sampling, round budget and system prompt from config.
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.model = Some(config.provider.model.clone());
        self.temperature = Some(config.provider.temperature);
        self.max_tokens = config.provider.max_tokens;
        self.policy = LoopPolicy::from(&config.agent);
        self.system_prompt = config.agent.system_prompt.clone();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn policy(mut self, policy: LoopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use an existing bus instead of creating one.
    pub fn bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Fails with [`Error::Construction`] if the provider, the tool registry
    /// or the model name is missing.
    pub fn build(self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or(Error::Construction { component: "provider" })?;
        let registry = self
            .registry
            .ok_or(Error::Construction { component: "tool registry" })?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or(Error::Construction { component: "model" })?;

        let bus = match (self.bus, &self.events) {
            (Some(bus), _) => bus,
            (None, Some(events)) => Arc::new(MessageBus::with_events(Arc::clone(events))),
            (None, None) => Arc::new(MessageBus::new()),
        };

        let mut tool_loop = ToolCallLoop::new(provider, Arc::clone(&registry), model)
            .with_max_tokens(self.max_tokens)
            .with_policy(self.policy);
        if let Some(temperature) = self.temperature {
            tool_loop = tool_loop.with_temperature(temperature);
        }
        if let Some(events) = &self.events {
            tool_loop = tool_loop.with_events(Arc::clone(events));
        }

        let handler: Arc<dyn MessageHandler> = Arc::new(ConversationHandler {
            bus: Arc::downgrade(&bus),
            registry,
            tool_loop,
            system_prompt: self.system_prompt,
            events: self.events,
        });
        bus.subscribe(Arc::clone(&handler));

        Ok(Orchestrator { bus, handler })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use legion_core::provider::{ProviderRequest, ProviderResponse};
    use legion_core::tool::{FnTool, StaticToolRegistry};
    use legion_core::{ProviderError, ToolError};
    use std::time::Duration;

    fn clock_registry() -> Arc<dyn ToolRegistry> {
        let mut registry = StaticToolRegistry::new();
        registry.register(FnTool::new(
            "get_current_time",
            "Get the current time",
            |_args, _cancel| async { Ok("14:00".to_string()) },
        ));
        Arc::new(registry)
    }

    fn orchestrator(provider: Arc<SequentialMockProvider>) -> Orchestrator {
        Orchestrator::builder()
            .provider(provider)
            .registry(clock_registry())
            .model("mock-model")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn chat_text_hi_hello() {
        let provider = Arc::new(SequentialMockProvider::single_text("hello"));
        let orchestrator = orchestrator(provider);

        let reply = orchestrator
            .chat_text("hi", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "hello");

        let bus = orchestrator.bus();
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.pending(), 0);
        assert!(bus.orphans().is_empty());
    }

    #[tokio::test]
    async fn chat_runs_tools_and_returns_final_entry_only() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("get_current_time", serde_json::json!({}))],
            "",
            "It is 14:00",
        ));
        let orchestrator = orchestrator(provider.clone());

        let response = orchestrator
            .chat(ChatRequest::text("What time is it?"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.content, vec![Content::assistant("It is 14:00")]);
        assert_eq!(provider.call_count(), 2);

        let request = orchestrator.bus().request_for(&response.conversation_id).unwrap();
        assert_eq!(request.content, vec![Content::user("What time is it?")]);
    }

    #[tokio::test]
    async fn system_prompt_is_prepended() {
        let provider = Arc::new(SequentialMockProvider::single_text("Aye"));
        let orchestrator = Orchestrator::builder()
            .provider(provider.clone())
            .registry(clock_registry())
            .model("mock-model")
            .system_prompt("Talk like a pirate.")
            .build()
            .unwrap();

        let reply = orchestrator
            .chat_text("hello", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "Aye");

        let sent = &provider.requests()[0];
        assert_eq!(sent.messages[0], Content::system("Talk like a pirate."));
        assert_eq!(sent.messages[1], Content::user("hello"));
        assert_eq!(sent.tools.len(), 1);
    }

    #[tokio::test]
    async fn loop_failure_becomes_fault_response() {
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe();
        // Empty script: the first backend call fails.
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let orchestrator = Orchestrator::builder()
            .provider(provider)
            .registry(clock_registry())
            .model("mock-model")
            .events(events)
            .build()
            .unwrap();

        let result = orchestrator
            .chat(ChatRequest::text("hi"), CancellationToken::new())
            .await;

        match result {
            Err(Error::Bus(BusError::HandlerFault { reason, .. })) => {
                assert!(reason.contains("no more responses"), "reason: {reason}");
            }
            other => panic!("expected HandlerFault, got {other:?}"),
        }

        // The fault response was correlated, so nothing is left waiting.
        assert_eq!(orchestrator.bus().pending(), 0);
        let log = orchestrator.bus().log();
        assert_eq!(log.len(), 2);
        assert!(log[1].error.is_some());

        let mut saw_fault = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::HandlerFault { .. }) {
                saw_fault = true;
            }
        }
        assert!(saw_fault);
    }

    #[tokio::test]
    async fn tool_failure_becomes_fault_response() {
        let mut registry = StaticToolRegistry::new();
        registry.register(FnTool::new("explode", "fails", |_args, _cancel| async {
            Err(ToolError::ExecutionFailed {
                tool_name: "explode".into(),
                reason: "boom".into(),
            })
        }));
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("explode", serde_json::json!({}))],
            "",
            "unreachable",
        ));
        let orchestrator = Orchestrator::builder()
            .provider(provider)
            .registry(Arc::new(registry))
            .model("mock-model")
            .build()
            .unwrap();

        let err = orchestrator
            .chat_text("go", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "error: {err}");
    }

    #[tokio::test]
    async fn missing_collaborators_fail_construction() {
        let err = Orchestrator::builder()
            .registry(clock_registry())
            .model("m")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Construction { component: "provider" }));

        let err = Orchestrator::builder()
            .provider(Arc::new(SequentialMockProvider::new(vec![])))
            .model("m")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Construction { component: "tool registry" }));

        let err = Orchestrator::builder()
            .provider(Arc::new(SequentialMockProvider::new(vec![])))
            .registry(clock_registry())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Construction { component: "model" }));
    }

    #[tokio::test]
    async fn builder_takes_settings_from_config() {
        let mut config = AppConfig::default();
        config.provider.model = "qwen2.5".into();
        config.agent.system_prompt = Some("Be brief.".into());

        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let orchestrator = Orchestrator::builder()
            .config(&config)
            .provider(provider.clone())
            .registry(clock_registry())
            .build()
            .unwrap();

        orchestrator
            .chat_text("hi", CancellationToken::new())
            .await
            .unwrap();
        let sent = &provider.requests()[0];
        assert_eq!(sent.model, "qwen2.5");
        assert_eq!(sent.messages[0], Content::system("Be brief."));
    }

    /// Asks for `nap` once, then answers with the first user entry.
    struct NapProvider;

    #[async_trait]
    impl Provider for NapProvider {
        fn name(&self) -> &str {
            "nap"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            let asked = request.messages[0].text.clone();
            if request.messages.iter().any(|m| m.role == Role::Tool) {
                return Ok(make_text_response(&format!("{asked} done")));
            }
            Ok(make_tool_call_response(
                vec![make_tool_call("nap", serde_json::json!({}))],
                "",
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_conversation_leaves_others_untouched() {
        let mut registry = StaticToolRegistry::new();
        registry.register(FnTool::new("nap", "sleeps", |_args, cancel| async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(ToolError::Cancelled("nap".into())),
                _ = tokio::time::sleep(Duration::from_millis(100)) => Ok("rested".to_string()),
            }
        }));
        let orchestrator = Orchestrator::builder()
            .provider(Arc::new(NapProvider))
            .registry(Arc::new(registry))
            .model("m")
            .build()
            .unwrap();

        let cancel_a = CancellationToken::new();
        let trigger = cancel_a.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let (a, b) = tokio::join!(
            orchestrator.chat_text("a", cancel_a),
            orchestrator.chat_text("b", CancellationToken::new()),
        );

        assert!(matches!(a, Err(Error::Cancelled)));
        assert_eq!(b.unwrap(), "b done");

        let bus = orchestrator.bus();
        assert_eq!(bus.pending(), 0);
        assert!(bus.orphans().is_empty());
        // a's request, b's request, b's response
        assert_eq!(bus.len(), 3);
    }

    #[test]
    fn chat_response_text() {
        let response = ChatResponse {
            conversation_id: ConversationId::new(),
            content: vec![Content::assistant("first"), Content::assistant("second")],
        };
        assert_eq!(response.text(), Some("first"));

        let empty = ChatResponse {
            conversation_id: ConversationId::new(),
            content: vec![],
        };
        assert_eq!(empty.text(), None);
    }
}
