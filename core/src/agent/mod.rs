pub mod context;
pub mod loop_;
pub mod registry;

pub use context::{ContextBuilder, ConversationContext, DEFAULT_INSTRUCTION};
pub use loop_::{LoopController, TurnOutcome, TurnRequest};
pub use registry::{ToolRegistry, ToolRegistryBuilder};

use crate::config::Config;
use crate::providers::create_provider;
use crate::store::create_store;
use crate::tools::builtin_registry;
use std::sync::Arc;
use std::time::Duration;

/// Wires the configured provider, built-in tools and store into a controller.
pub fn build_controller(config: &Config) -> anyhow::Result<LoopController> {
    let provider = create_provider(config)?;
    let tools = Arc::new(builtin_registry(config)?);
    let store = create_store(config)?;

    let instruction = config
        .system_instruction
        .clone()
        .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());
    let context_builder = ContextBuilder::new(instruction).with_max_history(config.max_history);

    Ok(LoopController::new(provider, tools, store)
        .with_context_builder(context_builder)
        .with_max_round_trips(config.max_round_trips)
        .with_tool_timeout(Duration::from_secs(config.tool_timeout_secs))
        .with_tool_concurrency(config.tool_concurrency))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let mut config = Config::default();
        config.provider = Some("ollama".into());
        config.store.kind = "memory".into();

        let controller = build_controller(&config).unwrap();
        assert_eq!(controller.provider_name(), "ollama");
        assert_eq!(controller.tools().len(), 2);
    }
}
