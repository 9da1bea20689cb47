//! The agent step runner, model provider interface, and tool registry
//! (MCP + script providers) described by spec.md §4.5.

pub mod provider;
pub mod runner;
pub mod tools;

pub use provider::{
    MessageRole, ModelMessage, ModelOutcome, ModelProvider, ModelRequest, ModelResponse, ToolCall,
    ToolManifestEntry,
};
pub use runner::{AgentStepOutcome, AgentStepRunner, DEFAULT_TOOL_CALL_DEPTH};
pub use tools::{ToolOutcome, ToolProvider, ToolRegistry, ToolSpec};

#[cfg(test)]
pub use provider::MockModelProvider;
