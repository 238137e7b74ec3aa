use crate::traits::{ChatMessage, ToolCall};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const USER_AUTHOR: &str = "user";

#[derive(Debug, thiserror::Error)]
#[error("Session not found: {0}")]
pub struct SessionNotFound(pub String);

#[derive(Debug, thiserror::Error)]
#[error("Session already exists: {0}")]
pub struct SessionExists(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Default::default()
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: f64,
    pub content: Content,
}

impl Event {
    pub fn new(invocation_id: &str, author: &str, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            author: author.to_string(),
            timestamp: now_seconds(),
            content,
        }
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .collect()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .parts
            .iter()
            .filter_map(|p| p.function_response.as_ref())
            .collect()
    }
}

pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rebuilds chat history from recorded session events.
pub fn history_from_events(events: &[Event]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    for event in events {
        let text = event.content.text();

        if event.author == USER_AUTHOR {
            if !text.is_empty() {
                messages.push(ChatMessage::user(text));
            }
            continue;
        }

        let calls = event.function_calls();
        let responses = event.function_responses();

        if !calls.is_empty() {
            let tool_calls = calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.args.to_string(),
                })
                .collect();
            messages.push(ChatMessage::assistant_with_tool_calls(text, tool_calls));
        } else if !responses.is_empty() {
            for r in responses {
                messages.push(ChatMessage::tool_result(r.id.clone(), r.response.to_string()));
            }
        } else if !text.is_empty() {
            messages.push(ChatMessage::assistant(text));
        }
    }

    messages
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: Value,
    pub events: Vec<Event>,
    pub last_update_time: f64,
}

type SessionKey = (String, String, String);

fn key(app_name: &str, user_id: &str, session_id: &str) -> SessionKey {
    (
        app_name.to_string(),
        user_id.to_string(),
        session_id.to_string(),
    )
}

/// Process-local session storage.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: Option<Value>,
    ) -> Result<Session> {
        let id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write().await;
        let key = key(app_name, user_id, &id);
        if sessions.contains_key(&key) {
            return Err(SessionExists(id).into());
        }

        let session = Session {
            id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state: state.unwrap_or_else(|| Value::Object(Default::default())),
            events: Vec::new(),
            last_update_time: now_seconds(),
        };
        sessions.insert(key, session.clone());
        Ok(session)
    }

    pub async fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&key(app_name, user_id, session_id))
            .cloned()
    }

    /// Sessions of one user, without their events.
    pub async fn list(&self, app_name: &str, user_id: &str) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.app_name == app_name && s.user_id == user_id)
            .map(|s| Session {
                events: Vec::new(),
                ..s.clone()
            })
            .collect();
        found.sort_by(|a, b| a.last_update_time.total_cmp(&b.last_update_time));
        found
    }

    pub async fn delete(&self, app_name: &str, user_id: &str, session_id: &str) -> bool {
        self.sessions
            .write()
            .await
            .remove(&key(app_name, user_id, session_id))
            .is_some()
    }

    pub async fn append_events(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        events: &[Event],
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&key(app_name, user_id, session_id))
            .ok_or_else(|| SessionNotFound(session_id.to_string()))?;

        session.events.extend_from_slice(events);
        session.last_update_time = now_seconds();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_get_delete() {
        let store = SessionStore::new();
        let session = store
            .create("zoo_tour_guide", "u1", Some("s1".to_string()), None)
            .await
            .unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.state, json!({}));

        assert!(store.get("zoo_tour_guide", "u1", "s1").await.is_some());
        assert!(store.get("zoo_tour_guide", "u2", "s1").await.is_none());

        assert!(store.delete("zoo_tour_guide", "u1", "s1").await);
        assert!(!store.delete("zoo_tour_guide", "u1", "s1").await);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = SessionStore::new();
        store
            .create("app", "u1", Some("s1".to_string()), None)
            .await
            .unwrap();
        let err = store
            .create("app", "u1", Some("s1".to_string()), None)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<SessionExists>().is_some());
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let store = SessionStore::new();
        let a = store.create("app", "u1", None, None).await.unwrap();
        let b = store.create("app", "u1", None, None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.list("app", "u1").await.len(), 2);
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let store = SessionStore::new();
        let err = store
            .append_events("app", "u1", "nope", &[])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<SessionNotFound>().is_some());
    }

    #[test]
    fn history_replays_tool_round_trip() {
        let events = vec![
            Event::new("inv", USER_AUTHOR, Content::user_text("Tell me about lions")),
            Event::new(
                "inv",
                "zoo_tour_guide",
                Content {
                    role: "model".to_string(),
                    parts: vec![Part::function_call(FunctionCall {
                        id: "call_1".to_string(),
                        name: "get_animal_details".to_string(),
                        args: json!({"animal_name": "lion"}),
                    })],
                },
            ),
            Event::new(
                "inv",
                "zoo_tour_guide",
                Content {
                    role: "user".to_string(),
                    parts: vec![Part::function_response(FunctionResponse {
                        id: "call_1".to_string(),
                        name: "get_animal_details".to_string(),
                        response: json!({"result": "savanna"}),
                    })],
                },
            ),
            Event::new(
                "inv",
                "zoo_tour_guide",
                Content {
                    role: "model".to_string(),
                    parts: vec![Part::text("Lions live in the savanna.")],
                },
            ),
        ];

        let history = history_from_events(&events);
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

        let calls = history[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "get_animal_details");
        assert_eq!(calls[0].arguments, r#"{"animal_name":"lion"}"#);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history[3].content, "Lions live in the savanna.");
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = Event::new("inv-1", USER_AUTHOR, Content::user_text("hi"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["invocationId"], "inv-1");
        assert_eq!(json["content"]["parts"][0]["text"], "hi");
        assert!(json["content"]["parts"][0].get("functionCall").is_none());
    }
}
