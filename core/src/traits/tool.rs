use crate::schema::ParameterSchema;
use crate::traits::ToolInvocationRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub type ToolArgs = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Payload(Value),
    Failure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationResult {
    pub correlation_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolInvocationResult {
    pub fn payload(request: &ToolInvocationRequest, payload: Value) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Payload(payload),
        }
    }

    pub fn failure(request: &ToolInvocationRequest, failure: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Failure(failure.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure(_))
    }

    /// The result as a JSON object, the shape providers expect for function responses.
    pub fn response_object(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Payload(value @ Value::Object(_)) => value.clone(),
            ToolOutcome::Payload(value) => json!({ "result": value }),
            ToolOutcome::Failure(message) => json!({ "error": message }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub label: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Progress text shown to end users while the tool runs.
    fn label(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> ParameterSchema;

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<Value>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            label: self.label().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
