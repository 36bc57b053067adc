use crate::traits::{
    ConversationTurn, MessageRole, StoredMessage, ToolInvocationRequest, ToolInvocationResult,
};

pub const DEFAULT_INSTRUCTION: &str = "You are a helpful assistant who can call tools when needed.\nReturn markdown responses when possible.";

/// Per-request dialogue log. Turns are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    system_instruction: Option<String>,
    turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    pub fn new(system_instruction: Option<String>) -> Self {
        Self {
            system_instruction,
            turns: Vec::new(),
        }
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Appends a tool request immediately followed by its result. This is the
    /// only path for tool results, so every result has its request right before it.
    pub fn append_tool_exchange(
        &mut self,
        request: ToolInvocationRequest,
        result: ToolInvocationResult,
    ) {
        debug_assert_eq!(request.correlation_id, result.correlation_id);
        self.turns.push(ConversationTurn::tool_request(request));
        self.turns.push(ConversationTurn::tool_result(result));
    }

    pub fn snapshot(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub struct ContextBuilder {
    instruction: String,
    max_history: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION)
    }
}

impl ContextBuilder {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            max_history: 50,
        }
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn build_system_instruction(&self) -> String {
        let mut parts = vec![];
        if !self.instruction.trim().is_empty() {
            parts.push(self.instruction.trim().to_string());
        }
        parts.push(self.get_runtime_context());
        parts.join("\n\n---\n\n")
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            "## Runtime Context

### Current Time
{}",
            timestamp
        )
    }

    /// Seeds a context with the most recent stored history followed by the new user turn.
    pub fn build(&self, history: Vec<StoredMessage>, user_message: &str) -> ConversationContext {
        let mut context = ConversationContext::new(Some(self.build_system_instruction()));

        let skip = history.len().saturating_sub(self.max_history);
        for message in history.into_iter().skip(skip) {
            if message.content.trim().is_empty() {
                continue;
            }
            let turn = match message.role {
                MessageRole::User => ConversationTurn::user(message.content),
                MessageRole::Assistant => ConversationTurn::model(message.content),
            };
            context.append(turn);
        }

        context.append(ConversationTurn::user(user_message));
        context
    }
}
