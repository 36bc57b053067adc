use crate::error::GenerationError;
use crate::providers::{LineDecoder, ensure_success, http_client, spawn_line_stream};
use crate::traits::{
    ConversationTurn, GenerationRequest, ModelEvent, ModelStream, Provider, Role,
    ToolDeclaration, ToolInvocationRequest, TurnContent, new_correlation_id,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    text: Option<String>,
    function_call: Option<FunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(std::time::Duration::from_secs(300)),
            api_key: api_key.into(),
            model: "gemini-2.0-flash".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            temperature: 0.7,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, request: &GenerationRequest<'_>) -> GeminiRequest {
        GeminiRequest {
            system_instruction: request.system_instruction.map(|text| GeminiContent {
                role: None,
                parts: vec![json!({ "text": text })],
            }),
            contents: convert_turns(request.turns),
            tools: convert_tools(request.tools),
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

/// Consecutive turns from the same side are merged into one content entry,
/// so parallel function calls and their responses travel together.
fn convert_turns(turns: &[ConversationTurn]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for turn in turns {
        let role = match turn.role {
            Role::Model => "model",
            Role::User | Role::ToolResult => "user",
        };
        let part = match &turn.content {
            TurnContent::Text { text } => json!({ "text": text }),
            TurnContent::ToolRequest(request) => json!({
                "functionCall": {
                    "id": request.correlation_id,
                    "name": request.name,
                    "args": request.arguments,
                }
            }),
            TurnContent::ToolResult(result) => json!({
                "functionResponse": {
                    "id": result.correlation_id,
                    "name": result.name,
                    "response": result.response_object(),
                }
            }),
        };

        match contents.last_mut() {
            Some(last) if last.role == Some(role) => last.parts.push(part),
            _ => contents.push(GeminiContent {
                role: Some(role),
                parts: vec![part],
            }),
        }
    }

    contents
}

fn convert_tools(tools: &[ToolDeclaration]) -> Vec<GeminiTools> {
    if tools.is_empty() {
        return Vec::new();
    }

    let function_declarations = tools
        .iter()
        .map(|t| {
            let mut declaration = json!({
                "name": t.name,
                "description": t.description,
            });
            // Gemini rejects object schemas without properties.
            if !t.parameters.is_empty() {
                declaration["parameters"] = t.parameters.to_json_schema();
            }
            declaration
        })
        .collect();

    vec![GeminiTools {
        function_declarations,
    }]
}

#[derive(Default)]
struct GeminiDecoder;

impl LineDecoder for GeminiDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ModelEvent, GenerationError>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Vec::new();
        };
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                return vec![Err(GenerationError(format!(
                    "malformed Gemini stream chunk: {e}"
                )))];
            }
        };

        if let Some(error) = chunk.error {
            return vec![Err(GenerationError(format!(
                "Gemini stream error: {}",
                error.message
            )))];
        }

        if chunk.candidates.is_empty()
            && let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason)
        {
            return vec![Err(GenerationError(format!(
                "Gemini blocked the prompt: {reason}"
            )))];
        }

        let mut events = Vec::new();
        let parts = chunk
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        for part in parts {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text
                && !text.is_empty()
            {
                events.push(Ok(ModelEvent::TextDelta(text)));
            }
            if let Some(call) = part.function_call {
                let arguments = if call.args.is_null() {
                    json!({})
                } else {
                    call.args
                };
                let id = call.id.unwrap_or_else(new_correlation_id);
                events.push(Ok(ModelEvent::ToolCallRequested(
                    ToolInvocationRequest::new(call.name, arguments).with_correlation_id(id),
                )));
            }
        }

        events
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<ModelStream, GenerationError> {
        let body = self.build_request(&request);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, "Gemini").await?;

        Ok(spawn_line_stream(response, GeminiDecoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamType, ParameterSchema};
    use crate::test_support::{request_json, serve_once};
    use crate::traits::ToolInvocationResult;
    use futures_util::StreamExt;

    fn decode(line: &str) -> Vec<Result<ModelEvent, GenerationError>> {
        GeminiDecoder.decode_line(line)
    }

    #[test]
    fn decodes_text_parts() {
        let events =
            decode(r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#);
        assert_eq!(events, vec![Ok(ModelEvent::TextDelta("Hel".into()))]);
    }

    #[test]
    fn decodes_function_calls() {
        let events = decode(
            r#"data: {"candidates":[{"content":{"parts":[{"functionCall":{"name":"getLocation","args":{}}},{"functionCall":{"id":"abc","name":"getCurrentWeather","args":{"latitude":1.5,"longitude":2}}}]}}]}"#,
        );
        assert_eq!(events.len(), 2);
        match &events[0] {
            Ok(ModelEvent::ToolCallRequested(r)) => {
                assert_eq!(r.name, "getLocation");
                assert!(r.correlation_id.starts_with("call_"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            Ok(ModelEvent::ToolCallRequested(r)) => {
                assert_eq!(r.correlation_id, "abc");
                assert_eq!(r.arguments, json!({"latitude": 1.5, "longitude": 2}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_chunks_and_blocks_are_errors() {
        assert!(decode(r#"data: {"error":{"code":500,"message":"boom"}}"#)[0].is_err());
        assert!(decode(r#"data: {"promptFeedback":{"blockReason":"SAFETY"}}"#)[0].is_err());
        assert!(decode("data: {not json")[0].is_err());
    }

    #[test]
    fn ignores_non_data_lines_and_thoughts() {
        assert!(decode("").is_empty());
        assert!(decode(": keep-alive").is_empty());
        assert!(
            decode(r#"data: {"candidates":[{"content":{"parts":[{"text":"hmm","thought":true}]}}]}"#)
                .is_empty()
        );
    }

    #[test]
    fn tool_exchange_is_grouped_by_role() {
        let request = ToolInvocationRequest::new("getLocation", json!({}));
        let result = ToolInvocationResult::payload(&request, json!({"city": "San Jose"}));
        let turns = vec![
            ConversationTurn::user("weather?"),
            ConversationTurn::model("Let me check."),
            ConversationTurn::tool_request(request.clone()),
            ConversationTurn::tool_result(result),
        ];

        let contents = convert_turns(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role, Some("model"));
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(contents[1].parts[1]["functionCall"]["name"], "getLocation");
        assert_eq!(contents[2].role, Some("user"));
        assert_eq!(
            contents[2].parts[0]["functionResponse"]["response"]["city"],
            "San Jose"
        );
        assert_eq!(
            contents[2].parts[0]["functionResponse"]["id"],
            request.correlation_id.as_str()
        );
    }

    #[test]
    fn parameterless_tools_omit_schema() {
        let tools = vec![
            ToolDeclaration {
                name: "getLocation".into(),
                label: "Getting location".into(),
                description: "where".into(),
                parameters: ParameterSchema::new(),
            },
            ToolDeclaration {
                name: "getCurrentWeather".into(),
                label: "Fetching weather".into(),
                description: "temp".into(),
                parameters: ParameterSchema::new().required("latitude", ParamType::Number, "lat"),
            },
        ];
        let converted = convert_tools(&tools);
        let declarations = &converted[0].function_declarations;
        assert!(declarations[0].get("parameters").is_none());
        assert_eq!(declarations[1]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn streams_from_server() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"It is \"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"sunny\"}]}}]}\r\n\r\n",
        );
        let (base_url, request) = serve_once("200 OK", "text/event-stream", body).await;
        let provider = GeminiProvider::new("key-123").with_base_url(base_url);

        let turns = vec![ConversationTurn::user("weather?")];
        let stream = provider
            .generate(GenerationRequest {
                system_instruction: Some("Be brief."),
                turns: &turns,
                tools: &[],
            })
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                Ok(ModelEvent::TextDelta("It is ".into())),
                Ok(ModelEvent::TextDelta("sunny".into())),
            ]
        );

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
        assert!(raw.to_lowercase().contains("x-goog-api-key: key-123"));
        let sent = request_json(&raw);
        assert_eq!(sent["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(sent["contents"][0]["role"], "user");
        assert!(sent.get("tools").is_none());
    }

    #[tokio::test]
    async fn http_errors_fail_generation_start() {
        let (base_url, _request) =
            serve_once("429 Too Many Requests", "application/json", "{\"error\":\"quota\"}").await;
        let provider = GeminiProvider::new("k").with_base_url(base_url);

        let err = provider
            .generate(GenerationRequest {
                system_instruction: None,
                turns: &[ConversationTurn::user("hi")],
                tools: &[],
            })
            .await
            .err()
            .unwrap();
        assert!(err.0.contains("429"));
        assert!(err.0.contains("quota"));
    }
}
