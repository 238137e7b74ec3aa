use crate::agent::session::{Content, Event, FunctionCall, FunctionResponse, Part};
use crate::agent::{Agent, ToolRegistry};
use crate::traits::{ChatMessage, ChatRequest, Provider, ToolResult};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ITERATIONS: usize = 20;
const MAX_ITERATIONS_REPLY: &str = "Max iterations reached";

/// What one user turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub events: Vec<Event>,
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    agent: Arc<Agent>,
    max_iterations: usize,
    temperature: f64,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, agent: Arc<Agent>) -> Self {
        Self {
            provider,
            agent,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: 1.0,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub async fn process(&self, message: &str) -> Result<String> {
        self.process_with_history(message, vec![]).await
    }

    pub async fn process_with_history(
        &self,
        message: &str,
        history: Vec<ChatMessage>,
    ) -> Result<String> {
        let invocation_id = new_invocation_id();
        let outcome = self.run_turn(&invocation_id, history, message, None).await?;
        Ok(outcome.reply)
    }

    /// Runs model and tool steps until the model answers in text. Every
    /// agent event is also sent to `sink` as soon as it exists.
    pub async fn run_turn(
        &self,
        invocation_id: &str,
        history: Vec<ChatMessage>,
        message: &str,
        sink: Option<&UnboundedSender<Event>>,
    ) -> Result<TurnOutcome> {
        let tool_registry = ToolRegistry::from_toolsets(self.agent.toolsets()).await?;
        let tools = tool_registry.get_specs();
        debug!(agent = self.agent.name(), tools = tools.len(), "tools resolved");

        let mut messages = history;
        messages.push(ChatMessage::user(message));

        let mut events = Vec::new();
        let mut emit = |event: Event| {
            if let Some(sink) = sink {
                let _ = sink.send(event.clone());
            }
            events.push(event);
        };

        for iteration in 1..=self.max_iterations {
            let request = ChatRequest {
                system: Some(self.agent.instruction()),
                messages: &messages,
                tools: if tools.is_empty() { None } else { Some(&tools) },
            };

            let response = self
                .provider
                .chat(request, self.agent.model(), self.temperature)
                .await
                .with_context(|| format!("{} request failed", self.provider.name()))?;

            let text = response.text_or_empty().to_string();

            if !response.has_tool_calls() {
                if !text.is_empty() {
                    messages.push(ChatMessage::assistant(text.clone()));
                    emit(self.model_event(invocation_id, vec![Part::text(&text)]));
                }
                info!(agent = self.agent.name(), iteration, "turn complete");
                return Ok(TurnOutcome {
                    reply: text,
                    events,
                });
            }

            let tool_calls = response.tool_calls;
            messages.push(ChatMessage::assistant_with_tool_calls(
                text.clone(),
                tool_calls.clone(),
            ));

            let mut call_parts = Vec::new();
            if !text.trim().is_empty() {
                call_parts.push(Part::text(&text));
            }

            let mut parsed_calls = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                let args = serde_json::from_str::<serde_json::Value>(&call.arguments);
                call_parts.push(Part::function_call(FunctionCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: args
                        .as_ref()
                        .cloned()
                        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone())),
                }));
                parsed_calls.push((call, args));
            }
            emit(self.model_event(invocation_id, call_parts));

            let mut response_parts = Vec::new();
            for (call, args) in parsed_calls {
                let result = match args {
                    Ok(args) => {
                        debug!(tool = %call.name, "executing tool");
                        tool_registry.execute(&call.name, args).await
                    }
                    Err(e) => ToolResult::error(format!(
                        "Failed to parse tool arguments for {}: {}",
                        call.name, e
                    )),
                };

                if let Some(error) = &result.error {
                    warn!(tool = %call.name, %error, "tool call failed");
                }

                let response = result.to_response();
                messages.push(ChatMessage::tool_result(call.id.clone(), response.to_string()));
                response_parts.push(Part::function_response(FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response,
                }));
            }
            emit(Event::new(
                invocation_id,
                self.agent.name(),
                Content {
                    role: "user".to_string(),
                    parts: response_parts,
                },
            ));
        }

        warn!(
            agent = self.agent.name(),
            max = self.max_iterations,
            "max iterations reached"
        );
        Ok(TurnOutcome {
            reply: MAX_ITERATIONS_REPLY.to_string(),
            events,
        })
    }

    fn model_event(&self, invocation_id: &str, parts: Vec<Part>) -> Event {
        Event::new(
            invocation_id,
            self.agent.name(),
            Content {
                role: "model".to_string(),
                parts,
            },
        )
    }
}

pub fn new_invocation_id() -> String {
    format!("e-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatResponse, Tool, ToolCall, Toolset};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<ChatResponse>>,
        seen: Mutex<Vec<(Option<String>, usize, usize)>>,
    }

    impl ScriptedProvider {
        fn new(mut replies: Vec<ChatResponse>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(
            &self,
            request: ChatRequest<'_>,
            _model: &str,
            _temperature: f64,
        ) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push((
                request.system.map(str::to_string),
                request.messages.len(),
                request.tools.map_or(0, |t| t.len()),
            ));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct LookupTool;

    #[async_trait]
    impl Tool for LookupTool {
        fn name(&self) -> &str {
            "get_animal_details"
        }

        fn description(&self) -> &str {
            "Get details about an animal"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"animal_name": {"type": "string"}}})
        }

        async fn execute(&self, args: serde_json::Value) -> Result<ToolResult> {
            Ok(ToolResult::success(format!(
                "{} lives in the savanna",
                args["animal_name"].as_str().unwrap_or("?")
            )))
        }
    }

    struct StaticToolset;

    #[async_trait]
    impl Toolset for StaticToolset {
        fn source(&self) -> &str {
            "memory://zoo"
        }

        async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
            Ok(vec![Arc::new(LookupTool)])
        }
    }

    struct BrokenToolset;

    #[async_trait]
    impl Toolset for BrokenToolset {
        fn source(&self) -> &str {
            "http://unreachable/mcp"
        }

        async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
            anyhow::bail!("connection refused")
        }
    }

    fn text(reply: &str) -> ChatResponse {
        ChatResponse {
            text: Some(reply.to_string()),
            tool_calls: vec![],
        }
    }

    fn call(id: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: "get_animal_details".to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }

    fn guide(toolset: Arc<dyn Toolset>) -> Arc<Agent> {
        Arc::new(
            Agent::new("zoo_tour_guide", "test-model", "Be a tour guide.").with_toolset(toolset),
        )
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call("c1", r#"{"animal_name":"lion"}"#),
            text("Lions live in the savanna."),
        ]));
        let agent_loop = AgentLoop::new(provider.clone(), guide(Arc::new(StaticToolset)));

        let outcome = agent_loop
            .run_turn("inv", vec![], "Where do lions live?", None)
            .await
            .unwrap();

        assert_eq!(outcome.reply, "Lions live in the savanna.");
        assert_eq!(outcome.events.len(), 3);
        assert_eq!(outcome.events[0].function_calls()[0].args["animal_name"], "lion");
        let response = outcome.events[1].function_responses()[0];
        assert_eq!(response.response["result"], "lion lives in the savanna");
        assert_eq!(outcome.events[2].content.text(), "Lions live in the savanna.");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0], (Some("Be a tour guide.".to_string()), 1, 1));
        assert_eq!(seen[1].1, 3);
    }

    #[tokio::test]
    async fn bad_arguments_are_reported_to_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call("c1", "{not json"),
            text("Sorry."),
        ]));
        let agent_loop = AgentLoop::new(provider, guide(Arc::new(StaticToolset)));

        let outcome = agent_loop.run_turn("inv", vec![], "?", None).await.unwrap();
        let response = outcome.events[1].function_responses()[0];
        assert!(
            response.response["error"]
                .as_str()
                .unwrap()
                .contains("Failed to parse tool arguments")
        );
    }

    #[tokio::test]
    async fn events_are_streamed_to_sink() {
        let provider = Arc::new(ScriptedProvider::new(vec![text("Hello!")]));
        let agent_loop = AgentLoop::new(provider, guide(Arc::new(StaticToolset)));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        agent_loop
            .run_turn("inv", vec![], "hi", Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.author, "zoo_tour_guide");
        assert_eq!(event.content.text(), "Hello!");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stops_at_max_iterations() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call("c1", r#"{"animal_name":"lion"}"#),
            call("c2", r#"{"animal_name":"lion"}"#),
        ]));
        let agent_loop =
            AgentLoop::new(provider, guide(Arc::new(StaticToolset))).with_max_iterations(2);

        let reply = agent_loop.process("loop forever").await.unwrap();
        assert_eq!(reply, "Max iterations reached");
    }

    #[tokio::test]
    async fn unreachable_toolset_fails_the_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![text("unused")]));
        let agent_loop = AgentLoop::new(provider, guide(Arc::new(BrokenToolset)));

        let err = agent_loop.process("hi").await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
    }
}
