use crate::error::ToolError;
use crate::traits::{Tool, ToolDeclaration, ToolInvocationRequest, ToolInvocationResult};
use std::collections::HashMap;
use std::sync::Arc;

pub const FALLBACK_LABEL: &str = "Calling tool";

/// Immutable name → tool table, built once at startup and shared by every request.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    declarations: Vec<ToolDeclaration>,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn Tool>>,
    declarations: Vec<ToolDeclaration>,
}

impl ToolRegistryBuilder {
    pub fn declare(mut self, tool: Arc<dyn Tool>) -> Result<Self, ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.declarations.push(tool.declaration());
        self.tools.insert(name, tool);
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            declarations: self.declarations,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn describe(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn label(&self, name: &str) -> &str {
        self.tools
            .get(name)
            .map(|t| t.label())
            .unwrap_or(FALLBACK_LABEL)
    }

    /// Runs a requested tool. Unknown tools, bad arguments and callable errors
    /// all come back as a failure result so the model can react to them.
    pub async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
        match self.try_invoke(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %request.name, error = %e, "tool request rejected");
                ToolInvocationResult::failure(request, e.to_string())
            }
        }
    }

    async fn try_invoke(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<ToolInvocationResult, ToolError> {
        let tool = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        let args = tool
            .parameters()
            .validate(&request.arguments)
            .map_err(|reason| ToolError::InvalidArguments {
                tool: request.name.clone(),
                reason,
            })?;

        let result = match tool.execute(args).await {
            Ok(payload) => ToolInvocationResult::payload(request, payload),
            Err(e) => {
                tracing::warn!(tool = %request.name, error = %e, "tool execution failed");
                ToolInvocationResult::failure(request, format!("Execution failed: {e}"))
            }
        };
        Ok(result)
    }
}
