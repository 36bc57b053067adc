use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        Self(format!("transport error: {e}"))
    }
}

/// The event sink can no longer deliver frames, usually because the client went away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("client transport closed")]
pub struct TransportClosed;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Tool loop exceeded {0} round-trips")]
    ToolLoopExceeded(usize),

    #[error("Client transport closed")]
    TransportClosed,

    #[error("Tool '{0}' faulted during dispatch")]
    DispatchFault(String),

    #[error("Conversation history unavailable: {0}")]
    HistoryUnavailable(String),
}

impl LoopError {
    /// Message safe to show an end user; provider and tool internals stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::GenerationFailed(_) => {
                "The assistant could not finish this response. Please try again."
            }
            Self::ToolLoopExceeded(_) => {
                "The assistant made too many tool calls and was stopped."
            }
            Self::TransportClosed => "The connection was closed.",
            Self::DispatchFault(_) => "A tool failed unexpectedly.",
            Self::HistoryUnavailable(_) => "The conversation history could not be loaded.",
        }
    }
}

impl From<GenerationError> for LoopError {
    fn from(e: GenerationError) -> Self {
        Self::GenerationFailed(e.0)
    }
}

impl From<TransportClosed> for LoopError {
    fn from(_: TransportClosed) -> Self {
        Self::TransportClosed
    }
}
