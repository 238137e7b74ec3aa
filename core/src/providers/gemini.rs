use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "$defs", "definitions", "additionalProperties"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

/// Gemini models through the Generative Language API.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn build_request(request: ChatRequest<'_>, temperature: f64) -> GeminiRequest {
        let mut system_parts: Vec<GeminiPart> = request
            .system
            .filter(|s| !s.trim().is_empty())
            .map(|s| GeminiPart {
                text: Some(s.to_string()),
                ..Default::default()
            })
            .into_iter()
            .collect();

        let mut contents: Vec<GeminiContent> = Vec::new();
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for m in request.messages {
            match m.role.as_str() {
                "system" => system_parts.push(GeminiPart {
                    text: Some(m.content.clone()),
                    ..Default::default()
                }),
                "assistant" => {
                    let mut parts = Vec::new();
                    if !m.content.trim().is_empty() {
                        parts.push(GeminiPart {
                            text: Some(m.content.clone()),
                            ..Default::default()
                        });
                    }
                    for tc in m.tool_calls.iter().flatten() {
                        call_names.insert(&tc.id, &tc.name);
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                id: Some(tc.id.clone()),
                                name: tc.name.clone(),
                                args: serde_json::from_str(&tc.arguments)
                                    .unwrap_or_else(|_| Value::Object(Default::default())),
                            }),
                            ..Default::default()
                        });
                    }
                    if !parts.is_empty() {
                        push_content(&mut contents, "model", parts);
                    }
                }
                "tool" => {
                    let id = m.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_names.get(id).copied().unwrap_or(id);
                    let part = GeminiPart {
                        function_response: Some(GeminiFunctionResponse {
                            id: Some(id.to_string()),
                            name: name.to_string(),
                            response: as_response_object(&m.content),
                        }),
                        ..Default::default()
                    };
                    push_content(&mut contents, "user", vec![part]);
                }
                _ => push_content(
                    &mut contents,
                    "user",
                    vec![GeminiPart {
                        text: Some(m.content.clone()),
                        ..Default::default()
                    }],
                ),
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools: request.tools.map(|t| vec![Self::convert_tools(t)]),
            generation_config: GenerationConfig { temperature },
        }
    }

    fn convert_tools(tools: &[ToolSpec]) -> GeminiTool {
        GeminiTool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: declared_parameters(&t.parameters_schema),
                })
                .collect(),
        }
    }

    fn parse_response(response: GeminiResponse) -> anyhow::Result<ChatResponse> {
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            anyhow::anyhow!(
                "No candidates in response (prompt feedback: {})",
                response
                    .prompt_feedback
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "none".to_string())
            )
        })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: call
                        .id
                        .unwrap_or_else(|| format!("gemini_{}", uuid::Uuid::new_v4())),
                    name: call.name,
                    arguments: call.args.to_string(),
                });
            }
        }

        if text.trim().is_empty() && tool_calls.is_empty() {
            return Err(anyhow::anyhow!(
                "Empty response from API: no content or tool calls (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ));
        }

        Ok(ChatResponse {
            text: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }
}

/// Merges into the previous turn when the role repeats; function responses
/// for one model turn must arrive together.
fn push_content(contents: &mut Vec<GeminiContent>, role: &str, parts: Vec<GeminiPart>) {
    if let Some(last) = contents.last_mut()
        && last.role.as_deref() == Some(role)
    {
        last.parts.extend(parts);
        return;
    }
    contents.push(GeminiContent {
        role: Some(role.to_string()),
        parts,
    });
}

fn as_response_object(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => serde_json::json!({ "result": other }),
        Err(_) => serde_json::json!({ "result": content }),
    }
}

fn declared_parameters(schema: &Value) -> Option<Value> {
    let schema = sanitize_schema(schema);
    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    if has_properties { Some(schema) } else { None }
}

/// Drops JSON Schema keywords the function-declaration schema does not accept.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ChatResponse> {
        let gemini_request = Self::build_request(request, temperature);

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&gemini_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Gemini API error {}: {}",
                status,
                error_text
            ));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        Self::parse_response(gemini_response)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_round_trip_is_converted() {
        let messages = vec![
            ChatMessage::user("Tell me about penguins"),
            ChatMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "c1".to_string(),
                    name: "get_animal_details".to_string(),
                    arguments: r#"{"animal_name":"penguin"}"#.to_string(),
                }],
            ),
            ChatMessage::tool_result("c1".to_string(), r#"{"result":"antarctica"}"#),
        ];
        let request = ChatRequest {
            system: Some("Be a tour guide."),
            messages: &messages,
            tools: None,
        };

        let body = serde_json::to_value(GeminiProvider::build_request(request, 0.5)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be a tour guide.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["args"]["animal_name"],
            "penguin"
        );
        let response = &body["contents"][2]["parts"][0]["functionResponse"];
        assert_eq!(response["name"], "get_animal_details");
        assert_eq!(response["response"]["result"], "antarctica");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parallel_tool_results_share_one_turn() {
        let calls = ["c1", "c2"]
            .iter()
            .map(|id| ToolCall {
                id: id.to_string(),
                name: "get_animal_details".to_string(),
                arguments: "{}".to_string(),
            })
            .collect();
        let messages = vec![
            ChatMessage::user("lions and giraffes?"),
            ChatMessage::assistant_with_tool_calls("", calls),
            ChatMessage::tool_result("c1".to_string(), "savanna"),
            ChatMessage::tool_result("c2".to_string(), "savanna"),
        ];
        let request = ChatRequest {
            system: None,
            messages: &messages,
            tools: None,
        };

        let body = serde_json::to_value(GeminiProvider::build_request(request, 1.0)).unwrap();
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][2]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["contents"][2]["parts"][1]["functionResponse"]["response"]["result"],
            "savanna"
        );
    }

    #[test]
    fn schema_is_sanitized() {
        let spec = ToolSpec {
            name: "get_animal_details".to_string(),
            description: "Get details about an animal".to_string(),
            parameters_schema: json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "additionalProperties": false,
                "properties": {"animal_name": {"type": "string"}},
                "required": ["animal_name"]
            }),
        };
        let tool = serde_json::to_value(GeminiProvider::convert_tools(&[spec])).unwrap();
        let params = &tool["functionDeclarations"][0]["parameters"];
        assert!(params.get("$schema").is_none());
        assert!(params.get("additionalProperties").is_none());
        assert_eq!(params["required"][0], "animal_name");
    }

    #[test]
    fn parameterless_tool_omits_schema() {
        assert!(declared_parameters(&json!({"type": "object", "properties": {}})).is_none());
    }

    #[test]
    fn response_with_function_call() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"functionCall": {"name": "get_animal_details", "args": {"animal_name": "lion"}}}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let parsed = GeminiProvider::parse_response(response).unwrap();
        assert!(parsed.text.is_none());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert!(parsed.tool_calls[0].id.starts_with("gemini_"));
        assert_eq!(parsed.tool_calls[0].arguments, r#"{"animal_name":"lion"}"#);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = GeminiProvider::parse_response(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
