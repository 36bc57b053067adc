use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(String),
    Token(String),
    ToolInvoked { label: String },
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Token(_) => "token",
            Self::ToolInvoked { .. } => "tool_call",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    /// Wire payload for the event. Tokens are JSON string literals so that
    /// newlines inside a fragment survive line-based framing.
    pub fn data(&self) -> String {
        match self {
            Self::Status(text) | Self::Error(text) => text.clone(),
            Self::Token(fragment) => json!(fragment).to_string(),
            Self::ToolInvoked { label } => json!({ "tool": label }).to_string(),
            Self::Done => "end".to_string(),
        }
    }

    pub fn from_wire(kind: &str, data: &str) -> Option<Self> {
        match kind {
            "status" => Some(Self::Status(data.to_string())),
            "token" => serde_json::from_str::<String>(data).ok().map(Self::Token),
            "tool_call" => serde_json::from_str::<serde_json::Value>(data)
                .ok()
                .and_then(|v| v.get("tool")?.as_str().map(str::to_string))
                .map(|label| Self::ToolInvoked { label }),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error(data.to_string())),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
