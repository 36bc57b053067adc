pub mod provider;
pub mod sink;
pub mod store;
pub mod tool;

pub use provider::{
    ConversationTurn, GenerationRequest, ModelEvent, ModelStream, Provider, Role, ToolInvocationRequest,
    TurnContent, new_correlation_id,
};
pub use sink::EventSink;
pub use store::{ConversationStore, MessageRole, StoredMessage};
pub use tool::{Tool, ToolArgs, ToolDeclaration, ToolInvocationResult, ToolOutcome};
