use crate::error::GenerationError;
use crate::traits::{ToolDeclaration, ToolInvocationResult};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationRequest {
    pub name: String,
    pub arguments: serde_json::Value,
    pub correlation_id: String,
}

impl ToolInvocationRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: new_correlation_id(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }
}

pub fn new_correlation_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolRequest(ToolInvocationRequest),
    ToolResult(ToolInvocationResult),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: TurnContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn tool_request(request: ToolInvocationRequest) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::ToolRequest(request),
        }
    }

    pub fn tool_result(result: ToolInvocationResult) -> Self {
        Self {
            role: Role::ToolResult,
            content: TurnContent::ToolResult(result),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCallRequested(ToolInvocationRequest),
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, GenerationError>>;

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system_instruction: Option<&'a str>,
    pub turns: &'a [ConversationTurn],
    pub tools: &'a [ToolDeclaration],
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Starts one generation pass. The returned stream is finite and not
    /// resumable; a failure mid-stream is delivered as an `Err` item.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<ModelStream, GenerationError>;
}
