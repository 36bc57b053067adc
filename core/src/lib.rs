pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod schema;
pub mod store;
pub mod stream;
pub mod tools;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{
    ContextBuilder, ConversationContext, LoopController, ToolRegistry, TurnOutcome, TurnRequest,
    build_controller,
};
pub use config::*;
pub use error::{GenerationError, LoopError, ToolError, TransportClosed};
pub use providers::{GeminiProvider, OllamaProvider, OpenAIProvider, create_provider};
pub use schema::{ParamType, ParameterSchema};
pub use store::{JsonlStore, MemoryStore, create_store};
pub use stream::{ChannelSink, SseDecoder, StreamEvent};
pub use tools::{LocationTool, WeatherTool, builtin_registry};
pub use traits::*;
