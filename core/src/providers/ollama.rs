use crate::error::GenerationError;
use crate::providers::{LineDecoder, ensure_success, http_client, spawn_line_stream};
use crate::traits::{
    ConversationTurn, GenerationRequest, ModelEvent, ModelStream, Provider, Role,
    ToolDeclaration, ToolInvocationRequest, TurnContent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaToolCallRequest {
    function: OllamaFunctionRequest,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionRequest {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    r#type: &'static str,
    function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
struct OllamaToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    message: Option<StreamMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCallResponse>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCallResponse {
    function: OllamaFunctionResponse,
}

#[derive(Debug, Deserialize)]
struct OllamaFunctionResponse {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(std::time::Duration::from_secs(300)),
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_messages(
    system_instruction: Option<&str>,
    turns: &[ConversationTurn],
) -> Vec<OllamaMessage> {
    let mut messages = Vec::new();
    if let Some(system) = system_instruction {
        messages.push(OllamaMessage {
            role: "system",
            content: system.to_string(),
            tool_calls: Vec::new(),
            tool_name: None,
        });
    }

    for turn in turns {
        match &turn.content {
            TurnContent::Text { text } => messages.push(OllamaMessage {
                role: if turn.role == Role::Model { "assistant" } else { "user" },
                content: text.clone(),
                tool_calls: Vec::new(),
                tool_name: None,
            }),
            TurnContent::ToolRequest(request) => {
                let call = OllamaToolCallRequest {
                    function: OllamaFunctionRequest {
                        name: request.name.clone(),
                        arguments: request.arguments.clone(),
                    },
                };
                match messages.last_mut() {
                    Some(last) if last.role == "assistant" => last.tool_calls.push(call),
                    _ => messages.push(OllamaMessage {
                        role: "assistant",
                        content: String::new(),
                        tool_calls: vec![call],
                        tool_name: None,
                    }),
                }
            }
            TurnContent::ToolResult(result) => messages.push(OllamaMessage {
                role: "tool",
                content: result.response_object().to_string(),
                tool_calls: Vec::new(),
                tool_name: Some(result.name.clone()),
            }),
        }
    }

    messages
}

fn convert_tools(tools: &[ToolDeclaration]) -> Vec<OllamaTool> {
    tools
        .iter()
        .map(|t| OllamaTool {
            r#type: "function",
            function: OllamaToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.to_json_schema(),
            },
        })
        .collect()
}

/// Ollama streams newline-delimited JSON objects rather than SSE.
struct NdjsonDecoder;

impl LineDecoder for NdjsonDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ModelEvent, GenerationError>> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let response: StreamResponse = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                return vec![Err(GenerationError(format!(
                    "malformed Ollama stream line: {e}"
                )))];
            }
        };

        if let Some(error) = response.error {
            return vec![Err(GenerationError(format!("Ollama error: {error}")))];
        }

        let mut events = Vec::new();
        let Some(message) = response.message else {
            return events;
        };

        if let Some(content) = message.content
            && !content.is_empty()
        {
            events.push(Ok(ModelEvent::TextDelta(content)));
        }

        for call in message.tool_calls {
            let arguments = if call.function.arguments.is_null() {
                serde_json::json!({})
            } else {
                call.function.arguments
            };
            events.push(Ok(ModelEvent::ToolCallRequested(
                ToolInvocationRequest::new(call.function.name, arguments),
            )));
        }

        events
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<ModelStream, GenerationError> {
        let body = OllamaRequest {
            model: &self.model,
            messages: convert_messages(request.system_instruction, request.turns),
            tools: convert_tools(request.tools),
            options: OllamaOptions {
                temperature: self.temperature,
            },
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, "Ollama").await?;

        Ok(spawn_line_stream(response, NdjsonDecoder))
    }
}
