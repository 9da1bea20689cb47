//! The Tool Registry (spec.md §4.5): providers keyed by kind (`mcp`,
//! `script`, ...), idempotent per-agent registration, duplicate tool
//! names across providers rejected, and a stable lexicographic tool
//! ordering per agent so cache keys/provider manifests stay deterministic.

pub mod mcp;
pub mod script;

use async_trait::async_trait;
use lacquer_core::error::{LacquerError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One concrete tool a provider exposes: the name the model sees, its
/// parameter schema, and enough identity for `execute` to route back to
/// the right provider-internal target (e.g. an MCP server name).
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters_schema: Value,
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// A source of tools, keyed by provider kind in the registry (e.g.
/// `mcp`, `script`).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;
    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolOutcome>;
}

struct AgentRegistration {
    providers: Vec<Arc<dyn ToolProvider>>,
}

#[derive(Default)]
pub struct ToolRegistry {
    agents: RwLock<HashMap<String, AgentRegistration>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for an agent. Idempotent: registering the
    /// same provider kind for the same agent twice is a no-op rather
    /// than an error, matching spec.md §4.5's "registration ... is
    /// idempotent".
    pub async fn register(&self, agent: &str, provider: Arc<dyn ToolProvider>) {
        let mut agents = self.agents.write().await;
        let entry = agents.entry(agent.to_string()).or_insert_with(|| AgentRegistration {
            providers: Vec::new(),
        });
        if !entry.providers.iter().any(|p| p.kind() == provider.kind()) {
            entry.providers.push(provider);
        }
    }

    /// Returns an agent's tools in stable lexicographic order, paired
    /// with the provider that owns each name. Errors if two providers
    /// declare the same tool name.
    pub async fn tools_for_agent(&self, agent: &str) -> Result<Vec<(ToolSpec, Arc<dyn ToolProvider>)>> {
        let agents = self.agents.read().await;
        let Some(registration) = agents.get(agent) else {
            return Ok(Vec::new());
        };

        let mut by_name: BTreeMap<String, (ToolSpec, Arc<dyn ToolProvider>)> = BTreeMap::new();
        for provider in &registration.providers {
            for spec in provider.list_tools().await? {
                if by_name.contains_key(&spec.name) {
                    return Err(LacquerError::ToolError {
                        tool_name: spec.name.clone(),
                        message: format!(
                            "tool '{}' is declared by more than one provider for agent '{agent}'",
                            spec.name
                        ),
                        transport_fault: false,
                    });
                }
                by_name.insert(spec.name.clone(), (spec, Arc::clone(provider)));
            }
        }

        Ok(by_name.into_values().collect())
    }

    /// Dispatches a tool call by looking up its owning provider among
    /// the agent's registered providers.
    pub async fn execute(&self, agent: &str, tool_name: &str, parameters: Value) -> Result<ToolOutcome> {
        let tools = self.tools_for_agent(agent).await?;
        let (_, provider) = tools
            .into_iter()
            .find(|(spec, _)| spec.name == tool_name)
            .ok_or_else(|| LacquerError::ToolError {
                tool_name: tool_name.to_string(),
                message: format!("no provider registered for tool '{tool_name}' on agent '{agent}'"),
                transport_fault: false,
            })?;
        provider.execute(tool_name, parameters).await
    }
}
