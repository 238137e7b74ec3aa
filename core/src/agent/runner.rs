use crate::agent::loop_::new_invocation_id;
use crate::agent::session::{
    Content, Event, SessionNotFound, SessionStore, USER_AUTHOR, history_from_events,
};
use crate::agent::{Agent, AgentLoop};
use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Binds one agent to an app name and a session store.
pub struct Runner {
    app_name: String,
    agent_loop: AgentLoop,
    sessions: SessionStore,
}

impl Runner {
    pub fn new(app_name: impl Into<String>, agent_loop: AgentLoop) -> Self {
        Self {
            app_name: app_name.into(),
            agent_loop,
            sessions: SessionStore::new(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Agent {
        self.agent_loop.agent()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Runs one user message in a session and returns every new event,
    /// starting with the user's own.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
        sink: Option<&UnboundedSender<Event>>,
    ) -> Result<Vec<Event>> {
        let session = self
            .sessions
            .get(&self.app_name, user_id, session_id)
            .await
            .ok_or_else(|| SessionNotFound(session_id.to_string()))?;

        let invocation_id = new_invocation_id();
        info!(
            app = %self.app_name,
            user = user_id,
            session = session_id,
            invocation = %invocation_id,
            "run started"
        );

        let history = history_from_events(&session.events);
        let text = new_message.text();

        let user_event = Event::new(&invocation_id, USER_AUTHOR, new_message);
        if let Some(sink) = sink {
            let _ = sink.send(user_event.clone());
        }

        let outcome = self
            .agent_loop
            .run_turn(&invocation_id, history, &text, sink)
            .await?;

        // The user turn is stored only alongside its answer.
        let mut events = Vec::with_capacity(outcome.events.len() + 1);
        events.push(user_event);
        events.extend(outcome.events);
        self.sessions
            .append_events(&self.app_name, user_id, session_id, &events)
            .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatRequest, ChatResponse, Provider};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct OneReply(Mutex<Option<ChatResponse>>);

    #[async_trait]
    impl Provider for OneReply {
        async fn chat(
            &self,
            _request: ChatRequest<'_>,
            _model: &str,
            _temperature: f64,
        ) -> Result<ChatResponse> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }

        fn name(&self) -> &str {
            "one-reply"
        }
    }

    async fn runner(reply: Option<&str>) -> Runner {
        let provider = Arc::new(OneReply(Mutex::new(reply.map(|text| ChatResponse {
            text: Some(text.to_string()),
            tool_calls: vec![],
        }))));
        let agent = Arc::new(Agent::new("zoo_tour_guide", "test-model", "Be a tour guide."));
        let runner = Runner::new("zoo_tour_guide", AgentLoop::new(provider, agent));
        runner
            .sessions()
            .create("zoo_tour_guide", "visitor", Some("s1".to_string()), None)
            .await
            .unwrap();
        runner
    }

    #[tokio::test]
    async fn successful_run_stores_question_and_answer() {
        let runner = runner(Some("Lions live in the savanna.")).await;
        let events = runner
            .run("visitor", "s1", Content::user_text("Where do lions live?"), None)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].author, USER_AUTHOR);
        let session = runner
            .sessions()
            .get("zoo_tour_guide", "visitor", "s1")
            .await
            .unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[1].content.text(), "Lions live in the savanna.");
    }

    #[tokio::test]
    async fn failed_run_leaves_session_untouched() {
        let runner = runner(None).await;
        let result = runner
            .run("visitor", "s1", Content::user_text("Where do lions live?"), None)
            .await;
        assert!(result.is_err());

        let session = runner
            .sessions()
            .get("zoo_tour_guide", "visitor", "s1")
            .await
            .unwrap();
        assert!(session.events.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let runner = runner(Some("hi")).await;
        let err = runner
            .run("visitor", "missing", Content::user_text("hello"), None)
            .await
            .err()
            .unwrap();
        assert!(err.downcast_ref::<SessionNotFound>().is_some());
    }
}
