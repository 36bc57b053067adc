use crate::error::GenerationError;
use crate::providers::{
    LineDecoder, ensure_success, http_client, parse_arguments, spawn_line_stream,
};
use crate::traits::{
    ConversationTurn, GenerationRequest, ModelEvent, ModelStream, Provider, ToolDeclaration,
    ToolInvocationRequest, TurnContent, new_correlation_id,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct OpenAIMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAIToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct OpenAIToolCallRequest {
    id: String,
    r#type: &'static str,
    function: OpenAIFunctionRequest,
}

#[derive(Debug, Serialize, PartialEq)]
struct OpenAIFunctionRequest {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: &'static str,
    function: OpenAIToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Chat Completions client. Also serves OpenRouter and other compatible
/// endpoints through `with_base_url`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    label: &'static str,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(std::time::Duration::from_secs(300)),
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            temperature: 0.7,
            label: "openai",
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            label: "openrouter",
            ..Self::new(api_key)
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
}

/// A model text turn and the tool requests that follow it become one
/// assistant message; each tool result becomes its own `tool` message.
fn convert_messages(
    system_instruction: Option<&str>,
    turns: &[ConversationTurn],
) -> Vec<OpenAIMessage> {
    let mut messages = Vec::new();
    if let Some(system) = system_instruction {
        messages.push(OpenAIMessage::text("system", system));
    }

    for turn in turns {
        match &turn.content {
            TurnContent::Text { text } => {
                let role = match turn.role {
                    crate::traits::Role::Model => "assistant",
                    _ => "user",
                };
                messages.push(OpenAIMessage::text(role, text));
            }
            TurnContent::ToolRequest(request) => {
                let call = OpenAIToolCallRequest {
                    id: request.correlation_id.clone(),
                    r#type: "function",
                    function: OpenAIFunctionRequest {
                        name: request.name.clone(),
                        arguments: request.arguments.to_string(),
                    },
                };
                match messages.last_mut() {
                    Some(last) if last.role == "assistant" => last.tool_calls.push(call),
                    _ => messages.push(OpenAIMessage {
                        role: "assistant",
                        content: None,
                        tool_calls: vec![call],
                        tool_call_id: None,
                    }),
                }
            }
            TurnContent::ToolResult(result) => messages.push(OpenAIMessage {
                role: "tool",
                content: Some(result.response_object().to_string()),
                tool_calls: Vec::new(),
                tool_call_id: Some(result.correlation_id.clone()),
            }),
        }
    }

    messages
}

fn convert_tools(tools: &[ToolDeclaration]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|t| OpenAITool {
            r#type: "function",
            function: OpenAIToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.to_json_schema(),
            },
        })
        .collect()
}

/// Tool call fragments arrive keyed by index; they are assembled here and
/// released in index order once the model finishes.
#[derive(Default)]
struct ChatCompletionDecoder {
    pending: BTreeMap<usize, PendingToolCall>,
}

impl ChatCompletionDecoder {
    fn flush(&mut self) -> Vec<Result<ModelEvent, GenerationError>> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                let id = if call.id.is_empty() {
                    new_correlation_id()
                } else {
                    call.id
                };
                let request = ToolInvocationRequest::new(call.name, parse_arguments(&call.arguments))
                    .with_correlation_id(id);
                Ok(ModelEvent::ToolCallRequested(request))
            })
            .collect()
    }
}

impl LineDecoder for ChatCompletionDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ModelEvent, GenerationError>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Vec::new();
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }

        let response: StreamResponse = match serde_json::from_str(data) {
            Ok(response) => response,
            Err(e) => {
                return vec![Err(GenerationError(format!("malformed stream chunk: {e}")))];
            }
        };

        if let Some(error) = response.error {
            return vec![Err(GenerationError(format!("stream error: {}", error.message)))];
        }

        let mut events = Vec::new();
        let Some(choice) = response.choices.into_iter().next() else {
            return events;
        };

        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(Ok(ModelEvent::TextDelta(content)));
        }

        for fragment in choice.delta.tool_calls {
            let entry = self.pending.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                entry.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    entry.name = name;
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }

        if choice.finish_reason.is_some() {
            events.extend(self.flush());
        }

        events
    }

    fn finish(&mut self) -> Vec<Result<ModelEvent, GenerationError>> {
        self.flush()
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        self.label
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<ModelStream, GenerationError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: convert_messages(request.system_instruction, request.turns),
            tools: convert_tools(request.tools),
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, self.label).await?;

        Ok(spawn_line_stream(response, ChatCompletionDecoder::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request_json, serve_once};
    use crate::traits::ToolInvocationResult;
    use futures_util::StreamExt;
    use serde_json::json;

    fn tool_calls(events: Vec<Result<ModelEvent, GenerationError>>) -> Vec<ToolInvocationRequest> {
        events
            .into_iter()
            .filter_map(|e| match e {
                Ok(ModelEvent::ToolCallRequested(r)) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_deltas_pass_through() {
        let mut decoder = ChatCompletionDecoder::default();
        let events = decoder.decode_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(events, vec![Ok(ModelEvent::TextDelta("Hi".into()))]);
        assert!(decoder.decode_line("data: [DONE]").is_empty());
        assert!(decoder.decode_line("").is_empty());
    }

    #[test]
    fn tool_call_fragments_are_assembled_in_index_order() {
        let mut decoder = ChatCompletionDecoder::default();
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"getCurrentWeather","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"getLocation","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"latitude\":1,"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\"longitude\":2}"}}]}}]}"#,
        ];
        for line in lines {
            assert!(decoder.decode_line(line).is_empty());
        }

        let calls = tool_calls(
            decoder.decode_line(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "getLocation");
        assert_eq!(calls[0].correlation_id, "call_a");
        assert_eq!(calls[1].correlation_id, "call_b");
        assert_eq!(calls[1].arguments, json!({"latitude": 1, "longitude": 2}));
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn unfinished_calls_flush_at_end_of_stream() {
        let mut decoder = ChatCompletionDecoder::default();
        decoder.decode_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"getLocation"}}]}}]}"#,
        );
        let calls = tool_calls(decoder.finish());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({}));
        assert!(calls[0].correlation_id.starts_with("call_"));
    }

    #[test]
    fn malformed_arguments_are_kept_as_text() {
        let mut decoder = ChatCompletionDecoder::default();
        decoder.decode_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"x","function":{"name":"getCurrentWeather","arguments":"{\"lat"}}]}}]}"#,
        );
        let calls = tool_calls(decoder.finish());
        assert_eq!(calls[0].arguments, json!("{\"lat"));
    }

    #[test]
    fn error_payloads_are_errors() {
        let mut decoder = ChatCompletionDecoder::default();
        let events = decoder.decode_line(r#"data: {"error":{"message":"overloaded"}}"#);
        assert_eq!(
            events,
            vec![Err(GenerationError("stream error: overloaded".into()))]
        );
    }

    #[test]
    fn tool_requests_join_the_preceding_assistant_text() {
        let first = ToolInvocationRequest::new("getLocation", json!({})).with_correlation_id("a");
        let second = ToolInvocationRequest::new("getLocation", json!({})).with_correlation_id("b");
        let turns = vec![
            ConversationTurn::user("where?"),
            ConversationTurn::model("Checking."),
            ConversationTurn::tool_request(first.clone()),
            ConversationTurn::tool_result(ToolInvocationResult::failure(&first, "nope")),
            ConversationTurn::tool_request(second.clone()),
            ConversationTurn::tool_result(ToolInvocationResult::payload(&second, json!(3))),
        ];

        let messages = convert_messages(Some("sys"), &turns);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "assistant", "tool"]);
        assert_eq!(messages[2].content.as_deref(), Some("Checking."));
        assert_eq!(messages[2].tool_calls[0].id, "a");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[3].content.as_deref(), Some(r#"{"error":"nope"}"#));
        assert_eq!(messages[4].content, None);
        assert_eq!(messages[5].content.as_deref(), Some(r#"{"result":3}"#));
    }

    #[tokio::test]
    async fn streams_tool_calls_from_server() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"One sec\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"getLocation\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (base_url, request) = serve_once("200 OK", "text/event-stream", body).await;
        let provider = OpenAIProvider::new("sk-test")
            .with_base_url(base_url)
            .with_model("gpt-test");

        let turns = vec![ConversationTurn::user("where am I?")];
        let tools = vec![crate::traits::Tool::declaration(
            &crate::tools::LocationTool::default(),
        )];
        let events: Vec<_> = provider
            .generate(GenerationRequest {
                system_instruction: None,
                turns: &turns,
                tools: &tools,
            })
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events[0], Ok(ModelEvent::TextDelta("One sec".into())));
        let calls = tool_calls(events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].correlation_id, "call_1");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /chat/completions"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
        let sent = request_json(&raw);
        assert_eq!(sent["model"], "gpt-test");
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["tools"][0]["function"]["name"], "getLocation");
    }

    #[test]
    fn openrouter_uses_its_own_endpoint() {
        let provider = OpenAIProvider::openrouter("k");
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.base_url, OPENROUTER_BASE_URL);
    }
}
